//! Option value constraints.
//!
//! Constraint payloads follow the option descriptor on the wire. Range
//! bounds and word lists are raw words, so for fixed-point options they
//! are fixed-point words too and candidate values must be converted with
//! [`to_fixed`](crate::wire::to_fixed) before checking.

use crate::error::Result;
use crate::wire::{from_fixed, ConstraintKind, ValueType, Wire};
use std::io::{Read, Write};

/// Rule limiting the legal values of an option.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Constraint {
    /// Every value is accepted
    #[default]
    None,

    /// Inclusive numeric range
    ///
    /// A value must satisfy `min <= v <= max` and be a multiple of `quant`.
    /// A quantization of zero disables the multiple check.
    Range {
        /// Lower bound (inclusive)
        min: i32,
        /// Upper bound (inclusive)
        max: i32,
        /// Quantization step
        quant: i32,
    },

    /// Finite set of permitted words
    IntegerEnum(Vec<i32>),

    /// Finite set of permitted strings
    StringEnum(Vec<String>),
}

impl Constraint {
    /// Checks a textual value.
    ///
    /// Numeric constraints parse the text as an integer first; text that
    /// does not parse is rejected.
    pub fn is_valid_str(&self, value: &str) -> bool {
        match self {
            Constraint::None => true,
            Constraint::Range { .. } | Constraint::IntegerEnum(_) => value
                .trim()
                .parse::<i32>()
                .map(|v| self.is_valid_int(v))
                .unwrap_or(false),
            Constraint::StringEnum(allowed) => allowed.iter().any(|s| s == value),
        }
    }

    /// Checks a word value
    pub fn is_valid_int(&self, value: i32) -> bool {
        match self {
            Constraint::None => true,
            Constraint::Range { min, max, quant } => {
                (*min..=*max).contains(&value) && (*quant == 0 || value.wrapping_rem(*quant) == 0)
            }
            Constraint::IntegerEnum(allowed) => allowed.contains(&value),
            Constraint::StringEnum(allowed) => {
                let text = value.to_string();
                allowed.iter().any(|s| *s == text)
            }
        }
    }

    /// Returns the kind tag of this constraint
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::None => ConstraintKind::None,
            Constraint::Range { .. } => ConstraintKind::Range,
            Constraint::IntegerEnum(_) => ConstraintKind::WordList,
            Constraint::StringEnum(_) => ConstraintKind::StringList,
        }
    }

    /// Formats the constraint for humans, rendering fixed-point words as
    /// decimals
    pub fn describe(&self, value_type: ValueType) -> String {
        let word = |w: i32| match value_type {
            ValueType::Fixed => format!("{}", from_fixed(w)),
            _ => w.to_string(),
        };
        match self {
            Constraint::None => String::new(),
            Constraint::Range { min, max, quant } if *quant == 0 => {
                format!("{}..{}", word(*min), word(*max))
            }
            Constraint::Range { min, max, quant } => {
                format!("{}..{} (step {})", word(*min), word(*max), word(*quant))
            }
            Constraint::IntegerEnum(values) => values
                .iter()
                .map(|&v| word(v))
                .collect::<Vec<_>>()
                .join("|"),
            Constraint::StringEnum(values) => values.join("|"),
        }
    }

    /// Decodes the payload that follows a constraint tag.
    pub(crate) fn decode<S>(kind: ConstraintKind, wire: &mut Wire<S>) -> Result<Self>
    where
        S: Read + Write,
    {
        Ok(match kind {
            ConstraintKind::None => Constraint::None,
            ConstraintKind::Range => {
                // pointer word ahead of the range struct
                wire.read_word()?;
                let min = wire.read_word()?;
                let max = wire.read_word()?;
                let quant = wire.read_word()?;
                Constraint::Range { min, max, quant }
            }
            ConstraintKind::WordList => {
                wire.read_word()?;
                Constraint::IntegerEnum(wire.read_array(|w| w.read_word())?)
            }
            ConstraintKind::StringList => {
                Constraint::StringEnum(wire.read_array(|w| w.read_string())?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, Script};
    use crate::wire::to_fixed;
    use pretty_assertions::assert_eq;

    fn range(min: i32, max: i32, quant: i32) -> Constraint {
        Constraint::Range { min, max, quant }
    }

    #[test]
    fn test_none_accepts_everything() {
        assert!(Constraint::None.is_valid_int(i32::MIN));
        assert!(Constraint::None.is_valid_str("anything"));
    }

    #[test]
    fn test_range_bounds_and_quantization() {
        let c = range(0, 100, 5);
        assert!(c.is_valid_int(0));
        assert!(c.is_valid_int(50));
        assert!(c.is_valid_int(100));
        assert!(!c.is_valid_int(51));
        assert!(!c.is_valid_int(-5));
        assert!(!c.is_valid_int(105));
    }

    #[test]
    fn test_range_without_quantization() {
        let c = range(-10, 10, 0);
        assert!(c.is_valid_int(-10));
        assert!(c.is_valid_int(7));
        assert!(!c.is_valid_int(11));
    }

    #[test]
    fn test_range_negative_quantization_at_extremes() {
        let c = range(i32::MIN, 0, -1);
        assert!(c.is_valid_int(i32::MIN));
        assert!(c.is_valid_int(-3));

        let c = range(i32::MIN, i32::MAX, -2);
        assert!(c.is_valid_int(i32::MIN));
        assert!(!c.is_valid_int(i32::MAX));
    }

    #[test]
    fn test_range_matches_brute_force() {
        let (min, max, quant) = (-12, 40, 4);
        let c = range(min, max, quant);
        for v in -50..50 {
            let expected = v >= min && v <= max && v % quant == 0;
            assert_eq!(c.is_valid_int(v), expected, "value {}", v);
        }
    }

    #[test]
    fn test_range_string_input() {
        let c = range(0, 100, 5);
        assert!(c.is_valid_str("25"));
        assert!(!c.is_valid_str("26"));
        assert!(!c.is_valid_str("twenty"));
        assert!(!c.is_valid_str(""));
    }

    #[test]
    fn test_range_with_fixed_bounds() {
        let c = range(0, to_fixed(215.9), 0);
        assert!(c.is_valid_int(to_fixed(100.5)));
        assert!(!c.is_valid_int(to_fixed(216.0)));
    }

    #[test]
    fn test_integer_enum_membership() {
        let c = Constraint::IntegerEnum(vec![75, 150, 300]);
        assert!(c.is_valid_int(150));
        assert!(!c.is_valid_int(151));
        assert!(c.is_valid_str("300"));
        assert!(!c.is_valid_str("3OO"));
    }

    #[test]
    fn test_string_enum_membership() {
        let c = Constraint::StringEnum(vec!["Color".into(), "Gray".into(), "600".into()]);
        assert!(c.is_valid_str("Gray"));
        assert!(!c.is_valid_str("gray"));
        assert!(c.is_valid_int(600));
        assert!(!c.is_valid_int(601));
    }

    #[test]
    fn test_empty_sets_reject_everything() {
        assert!(!Constraint::IntegerEnum(vec![]).is_valid_int(0));
        assert!(!Constraint::StringEnum(vec![]).is_valid_str(""));
    }

    #[test]
    fn test_decode_range() {
        let script = Script::new().word(0).word(75).word(1200).word(25);
        let mut wire = Wire::new(MockTransport::new(script));
        let c = Constraint::decode(ConstraintKind::Range, &mut wire).unwrap();
        assert_eq!(c, range(75, 1200, 25));
    }

    #[test]
    fn test_decode_lists_drop_empty_entries() {
        let script = Script::new()
            .word(0)
            .word(3)
            .word(75)
            .word(0)
            .word(300)
            .word(3)
            .string("Color")
            .string("")
            .string("Gray");
        let mut wire = Wire::new(MockTransport::new(script));
        assert_eq!(
            Constraint::decode(ConstraintKind::WordList, &mut wire).unwrap(),
            Constraint::IntegerEnum(vec![75, 300])
        );
        assert_eq!(
            Constraint::decode(ConstraintKind::StringList, &mut wire).unwrap(),
            Constraint::StringEnum(vec!["Color".into(), "Gray".into()])
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(range(75, 1200, 25).describe(ValueType::Integer), "75..1200 (step 25)");
        assert_eq!(
            range(0, to_fixed(2.5), 0).describe(ValueType::Fixed),
            "0..2.5"
        );
        assert_eq!(
            Constraint::StringEnum(vec!["Color".into(), "Gray".into()]).describe(ValueType::String),
            "Color|Gray"
        );
    }
}
