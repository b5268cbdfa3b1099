//! Macro for mapping enums onto their wire or config strings
//!
//! ```rust
//! use busline_domain::impl_wire_str_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Flavor {
//!     Plain,
//!     Fancy,
//! }
//!
//! impl_wire_str_conversions!(Flavor {
//!     Plain => "plain",
//!     Fancy => "fancy",
//! });
//!
//! assert_eq!(Flavor::Fancy.as_wire_str(), "fancy");
//! assert_eq!("PLAIN".parse::<Flavor>(), Ok(Flavor::Plain));
//! ```

/// Implements `as_wire_str`, `Display` and case-insensitive `FromStr` for a
/// fieldless enum.
///
/// Strings on the right-hand side must be lowercase.
#[macro_export]
macro_rules! impl_wire_str_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl $enum_name {
            /// The exact string used on the wire and in configuration.
            #[must_use]
            pub const fn as_wire_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_wire_str())
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
