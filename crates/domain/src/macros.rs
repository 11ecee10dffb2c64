//! Display/FromStr for the string-backed enums persisted in SQLite columns.
//!
//! ```rust
//! use orgsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum LeaseScope {
//!     Sync,
//!     Refresh,
//! }
//!
//! impl_domain_status_conversions!(LeaseScope {
//!     Sync => "sync",
//!     Refresh => "refresh",
//! });
//!
//! assert_eq!(LeaseScope::Refresh.to_string(), "refresh");
//! assert_eq!("SYNC".parse::<LeaseScope>(), Ok(LeaseScope::Sync));
//! ```

/// Implements `Display` and case-insensitive `FromStr` for a fieldless enum.
///
/// Each `$variant => $str` pair fixes the stored representation. Parsing
/// failures carry the enum name so repository warnings stay readable.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }

        impl $enum_name {
            /// Stored string form.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }
    };
}
