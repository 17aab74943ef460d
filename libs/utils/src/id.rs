//! Random, hex-printable identifiers.
//!
//! Each id is a newtype around a 128-bit random value, rendered as lowercase
//! hex. `Display`/`FromStr` round-trip so the ids can be logged, put in URLs,
//! and parsed back out of config/journal entries.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name([u8; 16]);

        impl $name {
            pub fn generate() -> Self {
                let mut buf = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut buf);
                $name(buf)
            }

            pub fn from_array(b: [u8; 16]) -> Self {
                $name(b)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut buf = [0u8; 16];
                hex::decode_to_slice(s, &mut buf)?;
                Ok($name(buf))
            }
        }
    };
}

id_type!(SessionId);
id_type!(WorkerId);
id_type!(NodeId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = SessionId::generate();
        let printed = id.to_string();
        assert_eq!(printed.len(), 32);
        assert_eq!(printed.parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn distinct_generations_are_distinct() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }
}
