/// Number of distinct MIDI note numbers.
pub const NUM_NOTES: usize = 128;

const A4_NOTE: f64 = 69.0;
const A4_FREQUENCY: f64 = 440.0;

/// Equal-temperament frequency in Hz of a MIDI note, with A4 (note 69) at 440 Hz.
pub fn note_to_frequency(note: u8) -> f64 {
    A4_FREQUENCY * 2.0f64.powf((note as f64 - A4_NOTE) / 12.0)
}

pub fn is_valid_note(note: u8) -> bool {
    (note as usize) < NUM_NOTES
}


#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use proptest::prelude::*;

    #[test]
    fn a4_is_440() {
        assert_eq!(note_to_frequency(69), 440.0);
    }

    #[test]
    fn octaves_double() {
        assert!(approx_eq!(f64, note_to_frequency(81), 880.0, ulps = 4));
        assert!(approx_eq!(f64, note_to_frequency(57), 220.0, ulps = 4));
        assert!(approx_eq!(f64, note_to_frequency(60), 261.625_565_300_598_6, epsilon = 1e-9));
    }

    #[test]
    fn note_range() {
        assert!(is_valid_note(0));
        assert!(is_valid_note(127));
        assert!(!is_valid_note(128));
        assert!(!is_valid_note(255));
    }

    proptest! {
        #[test]
        fn matches_equal_temperament(note in 0u8..128) {
            let expected = 440.0 * 2.0f64.powf((note as f64 - 69.0) / 12.0);
            prop_assert!(approx_eq!(f64, note_to_frequency(note), expected, epsilon = 1e-9));
        }

        #[test]
        fn semitone_ratio(note in 0u8..127) {
            let ratio = note_to_frequency(note + 1) / note_to_frequency(note);
            prop_assert!(approx_eq!(f64, ratio, 2.0f64.powf(1.0 / 12.0), epsilon = 1e-12));
        }
    }
}
