//! Case-insensitive string enums.
//!
//! Persisted state and configuration spell enum values by hand, so parsing
//! ignores ASCII case and surrounding whitespace. Serialization always emits
//! the canonical lower-case name.

/// Implements `as_str`, `FromStr`, `Display`, `Serialize` and `Deserialize`
/// for a fieldless enum. The calling crate must depend on `serde`.
///
/// ```
/// tv_core::string_enum! {
///     pub enum Fan {
///         Low => "low",
///         High => "high",
///     }
/// }
///
/// assert_eq!("HIGH".parse::<Fan>().unwrap(), Fan::High);
/// assert_eq!(Fan::Low.as_str(), "low");
/// ```
#[macro_export]
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::CoreError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let raw = raw.trim();
                $(
                    if raw.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::CoreError::InvalidArg {
                    what: concat!("unknown ", stringify!($name), " value"),
                })
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(|_| {
                    <D::Error as ::serde::de::Error>::unknown_variant(&raw, &[$($text),+])
                })
            }
        }
    };
}
