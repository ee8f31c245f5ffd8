use std::error::Error;

/// Log a recoverable error as a warning and keep going.
pub fn log_if_error<T, E: Error>(msg: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(o) => Some(o),
        Err(e) => {
            log::warn!("{}: {}", msg, e);
            None
        }
    }
}
