pub use tokio_modbus::{Address, Quantity};

/// 16-bit value stored in Modbus register.
pub type Word = u16;

/// Malformed register payload or a value that cannot be put on the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("span of {count} registers at offset {offset} exceeds block of {len} registers")]
    OutOfBounds {
        offset: Address,
        count: Quantity,
        len: usize,
    },
    #[error("expected {expected} registers, got {actual}")]
    WordCount { expected: usize, actual: usize },
    #[error("string register payload is not valid UTF-8")]
    Utf8,
    #[error("invalid station timestamp {0}")]
    InvalidTimestamp(String),
    #[error("{name} value {value} outside of {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{name} has no option {value}")]
    InvalidOption { name: &'static str, value: u16 },
    #[error("socket {0} is not available")]
    InvalidSocket(u8),
}

/// Decode a value from Big Endian-ordered `Word`s (most significant register first).
pub trait Decode: Sized {
    fn from_be_words(words: &[Word]) -> Result<Self, CodecError>;
}

macro_rules! impl_decode {
    ($num_type:ty) => {
        impl Decode for $num_type {
            fn from_be_words(words: &[Word]) -> Result<Self, CodecError> {
                let bytes = words
                    .iter()
                    .copied()
                    .flat_map(u16::to_be_bytes)
                    .collect::<Vec<u8>>();
                let actual = words.len();
                let array = bytes.try_into().or(Err(CodecError::WordCount {
                    expected: std::mem::size_of::<$num_type>() / 2,
                    actual,
                }))?;
                Ok(<$num_type>::from_be_bytes(array))
            }
        }
    };
}

impl_decode!(i16);
impl_decode!(i32);
impl_decode!(i64);
impl_decode!(u16);
impl_decode!(u32);
impl_decode!(u64);
impl_decode!(f32);
impl_decode!(f64);

/// Encode a value into Big Endian-ordered `Word`s.
pub trait Encode {
    fn to_be_words(self) -> Vec<Word>;
}

macro_rules! impl_encode {
    ($num_type:ty) => {
        impl Encode for $num_type {
            fn to_be_words(self) -> Vec<Word> {
                self.to_be_bytes()
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect()
            }
        }
    };
}

impl_encode!(i16);
impl_encode!(i32);
impl_encode!(i64);
impl_encode!(u16);
impl_encode!(u32);
impl_encode!(u64);
impl_encode!(f32);
impl_encode!(f64);

/// Contiguous block of holding registers decoded as a whole.
///
/// Implemented with [`crate::derive::RegisterBlock`].
pub trait RegisterBlock: Sized {
    /// First holding register of the block.
    const ADDRESS: Address;
    /// Number of registers in the block.
    const COUNT: Quantity;

    fn decode(words: &[Word]) -> Result<Self, CodecError>;

    /// Inverse of [`RegisterBlock::decode`], used to populate simulated stations.
    fn encode(&self) -> Vec<Word>;
}

fn span(words: &[Word], offset: Address, count: Quantity) -> Result<&[Word], CodecError> {
    let start = offset as usize;
    let end = start + count as usize;
    words.get(start..end).ok_or(CodecError::OutOfBounds {
        offset,
        count,
        len: words.len(),
    })
}

/// Decode `count` registers starting at `offset`.
pub fn decode<T: Decode>(words: &[Word], offset: Address, count: Quantity) -> Result<T, CodecError> {
    T::from_be_words(span(words, offset, count)?)
}

/// Decode a fixed-length string of `count` registers, truncated at the first NUL byte.
pub fn decode_string(words: &[Word], offset: Address, count: Quantity) -> Result<String, CodecError> {
    let bytes = span(words, offset, count)?
        .iter()
        .copied()
        .flat_map(u16::to_be_bytes)
        .take_while(|byte| *byte != 0)
        .collect::<Vec<u8>>();
    String::from_utf8(bytes).or(Err(CodecError::Utf8))
}

/// Encode `text` into exactly `count` registers, NUL padded and truncated to fit.
pub fn encode_string(text: &str, count: Quantity) -> Vec<Word> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(count as usize * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Round to the 2 decimals every float is reported with.
///
/// The exact binary value is rounded half to even, values too large to carry a fraction are
/// returned unchanged.
pub fn round2(value: f64) -> f64 {
    // From 2^52 on every f64 is an integer
    if !value.is_finite() || value.abs() >= 4_503_599_627_370_496.0 {
        return value;
    }
    format!("{value:.2}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_big_endian_word_order() {
        let words = [0x0001, 0x0002];
        assert_eq!(decode::<u32>(&words, 0, 2).unwrap(), 0x0001_0002);
        assert_eq!(decode::<u16>(&words, 1, 1).unwrap(), 2);
        assert_eq!(decode::<i16>(&[0xFFFF], 0, 1).unwrap(), -1);
    }

    #[test]
    fn test_decode_u64_and_f64() {
        let words = 86_400_000u64.to_be_words();
        assert_eq!(words.len(), 4);
        assert_eq!(decode::<u64>(&words, 0, 4).unwrap(), 86_400_000);

        let words = 12_345.678f64.to_be_words();
        assert_eq!(decode::<f64>(&words, 0, 4).unwrap(), 12_345.678);
    }

    #[test]
    fn test_float32_round_trips_to_two_decimals() {
        for value in [0.0f32, 16.0, 230.17, 31.99, 6.5] {
            let words = value.to_be_words();
            let decoded = round2(f64::from(decode::<f32>(&words, 0, 2).unwrap()));
            assert_eq!(decoded, round2(f64::from(value)));
            assert!((decoded - f64::from(value)).abs() < 0.005);
        }
    }

    #[test]
    fn test_decode_out_of_bounds() {
        let words = [0u16; 4];
        assert_eq!(
            decode::<u32>(&words, 3, 2),
            Err(CodecError::OutOfBounds {
                offset: 3,
                count: 2,
                len: 4
            })
        );
        assert!(matches!(
            decode_string(&words, 2, 5),
            Err(CodecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_decode_wrong_word_count() {
        let words = [0u16; 4];
        assert_eq!(
            decode::<u32>(&words, 0, 3),
            Err(CodecError::WordCount {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_decode_string_stops_at_nul() {
        let mut words = encode_string("C2", 5);
        assert_eq!(words.len(), 5);
        assert_eq!(decode_string(&words, 0, 5).unwrap(), "C2");

        // Bytes after the terminator are ignored
        words[3] = u16::from_be_bytes([b'x', b'y']);
        assert_eq!(decode_string(&words, 0, 5).unwrap(), "C2");
    }

    #[test]
    fn test_decode_string_full_length_without_nul() {
        let words = encode_string("ALFEN", 2);
        assert_eq!(decode_string(&words, 0, 2).unwrap(), "ALFE");
    }

    #[test]
    fn test_decode_string_rejects_invalid_utf8() {
        let words = [u16::from_be_bytes([0xC3, 0x28])];
        assert_eq!(decode_string(&words, 0, 1), Err(CodecError::Utf8));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(230.456), 230.46);
        assert_eq!(round2(-1.234), -1.23);
        assert_eq!(round2(16.0), 16.0);
        // Ties go to the even digit
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(16.125), 16.12);
        assert_eq!(round2(230.625), 230.62);
        assert_eq!(round2(-16.125), -16.12);
        // 2.675 is stored slightly below the tie
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(1.7e308), 1.7e308);
        assert_eq!(round2(f64::INFINITY), f64::INFINITY);
        assert!(round2(f64::NAN).is_nan());
    }
}
