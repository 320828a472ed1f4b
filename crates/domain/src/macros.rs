//! Macro for implementing Display and FromStr for status enums
//!
//! Status enums cross the SQLite and JSON boundaries as strings, so every one
//! of them needs the same Display/FromStr pair. This macro generates both,
//! with case-insensitive parsing and consistent lowercase output.
//!
//! # Example
//!
//! ```rust
//! use dealflow_domain::impl_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum RunState {
//!     Queued,
//!     Running,
//!     Done,
//! }
//!
//! impl_status_conversions!(RunState {
//!     Queued => "queued",
//!     Running => "running",
//!     Done => "done",
//! });
//! ```

/// Implements Display and FromStr traits for status enums
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestStatus {
        Queued,
        Running,
        Done,
    }

    impl_status_conversions!(TestStatus {
        Queued => "queued",
        Running => "running",
        Done => "done",
    });

    #[test]
    fn display_uses_lowercase_strings() {
        assert_eq!(TestStatus::Queued.to_string(), "queued");
        assert_eq!(TestStatus::Running.to_string(), "running");
        assert_eq!(TestStatus::Done.to_string(), "done");
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!(TestStatus::from_str("QUEUED").unwrap(), TestStatus::Queued);
        assert_eq!(TestStatus::from_str("Running").unwrap(), TestStatus::Running);
        assert_eq!(TestStatus::from_str("dOnE").unwrap(), TestStatus::Done);
    }

    #[test]
    fn invalid_input_names_the_enum() {
        let result = TestStatus::from_str("paused");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid TestStatus: paused"));
    }

    #[test]
    fn roundtrip_through_display() {
        for status in [TestStatus::Queued, TestStatus::Running, TestStatus::Done] {
            let parsed = TestStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(status, parsed);
        }
    }
}
