//! Literal numeric conversion.
//!
//! Turns literal source text into bit-exact binary data for the literal
//! tables. Integers go through arbitrary-precision arithmetic so overflow
//! detection is exact for every radix; floating-point conversion uses
//! round-to-nearest-even and reports exponent/mantissa overflow per target
//! width.

use bigdecimal::BigDecimal;
use enumflags2::{bitflags, BitFlags};
use num_bigint::BigUint;
use num_traits::FromPrimitive;
use num_traits::Num;
use num_traits::ToPrimitive;
use num_traits::Zero;

use crate::compiler::lexer::{NumberBits, NumberInfo, NumberKind};

/// Per-type overflow flags for a converted literal.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    Int8 = 1 << 0,
    Int16 = 1 << 1,
    Int32 = 1 << 2,
    Int64 = 1 << 3,
    U8 = 1 << 4,
    U16 = 1 << 5,
    U32 = 1 << 6,
    U64 = 1 << 7,
    Fp32Exponent = 1 << 8,
    Fp32Mantissa = 1 << 9,
    Fp64Exponent = 1 << 10,
    Fp64Mantissa = 1 << 11,
}

/// Bit-exact conversion result.
///
/// `bits` holds the two's-complement image in the low bits for integers,
/// the IEEE-754 image for floating-point values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinaryData {
    pub bits: u64,
    pub overflow: BitFlags<Overflow>,
}

/// Integer width suffix only; `f`/`F` must survive because they are valid
/// hex digits.
fn strip_int_suffix(text: &str) -> &str {
    text.strip_suffix(['l', 'L']).unwrap_or(text)
}

fn strip_fp_suffix(text: &str) -> &str {
    text.strip_suffix(['f', 'F', 'd', 'D']).unwrap_or(text)
}

fn integer_flags(value: &BigUint) -> BitFlags<Overflow> {
    let mut flags = BitFlags::empty();
    let bits = value.bits();

    // unsigned widths
    if bits > 8 {
        flags |= Overflow::U8;
    }
    if bits > 16 {
        flags |= Overflow::U16;
    }
    if bits > 32 {
        flags |= Overflow::U32;
    }
    if bits > 64 {
        flags |= Overflow::U64;
    }

    // signed widths: a positive literal overflows i_N at 2^(N-1)
    if bits > 7 {
        flags |= Overflow::Int8;
    }
    if bits > 15 {
        flags |= Overflow::Int16;
    }
    if bits > 31 {
        flags |= Overflow::Int32;
    }
    if bits > 63 {
        flags |= Overflow::Int64;
    }

    flags
}

fn convert_integer(text: &str, kind: NumberKind) -> BinaryData {
    let digits = strip_int_suffix(text);
    let (radix, digits) = match kind {
        NumberKind::Hex => (16, &digits[2..]),
        NumberKind::Binary => (2, &digits[2..]),
        NumberKind::Octal => (8, &digits[1..]),
        _ => (10, digits),
    };

    let value = match BigUint::from_str_radix(digits, radix) {
        Ok(value) => value,
        // the lexer only feeds valid digit runs; treat anything else as 0
        Err(_) => BigUint::zero(),
    };

    let overflow = integer_flags(&value);

    // truncate to the low 64 bits
    let bits = (&value % (BigUint::from(1u8) << 64u32))
        .to_u64()
        .unwrap_or(u64::MAX);

    BinaryData { bits, overflow }
}

fn convert_floating(text: &str) -> BinaryData {
    let digits = strip_fp_suffix(text);
    let mut overflow = BitFlags::empty();

    let f64_value: f64 = digits.parse().unwrap_or(0.0);
    let f32_value = f64_value as f32;

    if f64_value.is_infinite() {
        overflow |= Overflow::Fp64Exponent;
    }
    if f32_value.is_infinite() && f64_value.is_finite() {
        overflow |= Overflow::Fp32Exponent;
    }

    // mantissa precision: the decimal text survives a round trip through
    // the binary representation iff no rounding occurred
    if let Ok(exact) = digits.parse::<BigDecimal>() {
        if f64_value.is_finite()
            && BigDecimal::from_f64(f64_value)
                .map(|d| d.normalized() != exact.normalized())
                .unwrap_or(false)
        {
            overflow |= Overflow::Fp64Mantissa;
        }
        if f32_value.is_finite()
            && BigDecimal::from_f32(f32_value)
                .map(|d| d.normalized() != exact.normalized())
                .unwrap_or(false)
        {
            overflow |= Overflow::Fp32Mantissa;
        }
    }

    BinaryData {
        bits: f64_value.to_bits(),
        overflow,
    }
}

/// Converts numeric literal text to its binary image with overflow flags.
pub fn string_to_binary(text: &str, info: NumberInfo) -> BinaryData {
    match info.kind {
        NumberKind::FpSingle | NumberKind::FpDouble => convert_floating(text),
        _ => convert_integer(text, info.kind),
    }
}

/// Convenience constructor for internally synthesized decimal literals.
pub fn decimal_info() -> NumberInfo {
    NumberInfo {
        kind: NumberKind::Decimal,
        bits: NumberBits::Normal,
    }
}

fn unescape(ch: char) -> u16 {
    match ch {
        'n' => b'\n' as u16,
        't' => b'\t' as u16,
        'r' => b'\r' as u16,
        'b' => 0x08,
        'f' => 0x0c,
        '0' => 0,
        other => other as u16,
    }
}

fn code_units(inner: &str) -> Vec<u16> {
    let mut units = Vec::new();
    let mut chars = inner.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                units.push(unescape(escaped));
            }
        } else {
            let mut buf = [0u16; 2];
            units.extend_from_slice(ch.encode_utf16(&mut buf));
        }
    }

    units
}

/// Decodes a character literal (`'a'`, `'\n'`, `'中'`) to its 16-bit value.
///
/// Text includes the surrounding quotes. A literal with more than one code
/// unit reports u16 overflow.
pub fn char_literal_value(text: &str) -> BinaryData {
    let inner = &text[1..text.len() - 1];
    let units = code_units(inner);

    let mut overflow = BitFlags::empty();
    if units.len() != 1 {
        overflow |= Overflow::U16;
    }

    BinaryData {
        bits: units.first().copied().unwrap_or(0) as u64,
        overflow,
    }
}

/// Encoded character stream of a string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedString {
    pub stream: Vec<u8>,
    /// true when any unit needs the full 16 bits (stream holds LE pairs)
    pub wide_char: bool,
}

/// Decodes a string literal (quotes included) to its character stream.
pub fn string_literal_stream(text: &str) -> EncodedString {
    let inner = &text[1..text.len() - 1];
    let units = code_units(inner);
    let wide_char = units.iter().any(|u| *u > 0xFF);

    let stream = if wide_char {
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    } else {
        units.iter().map(|u| *u as u8).collect()
    };

    EncodedString { stream, wide_char }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: NumberKind) -> NumberInfo {
        NumberInfo {
            kind,
            bits: NumberBits::Normal,
        }
    }

    #[test]
    fn small_decimal() {
        let data = string_to_binary("42", info(NumberKind::Decimal));
        assert_eq!(data.bits, 42);
        assert!(data.overflow.is_empty());
    }

    #[test]
    fn radix_parsing() {
        assert_eq!(string_to_binary("0x1F", info(NumberKind::Hex)).bits, 31);
        assert_eq!(string_to_binary("017", info(NumberKind::Octal)).bits, 15);
        assert_eq!(string_to_binary("0b101", info(NumberKind::Binary)).bits, 5);
        assert_eq!(
            string_to_binary(
                "9223372036854775807L",
                NumberInfo {
                    kind: NumberKind::Decimal,
                    bits: NumberBits::Long
                }
            )
            .bits,
            i64::MAX as u64
        );
    }

    #[test]
    fn integer_overflow_flags() {
        let data = string_to_binary("128", info(NumberKind::Decimal));
        assert!(data.overflow.contains(Overflow::Int8));
        assert!(!data.overflow.contains(Overflow::U8));
        assert!(!data.overflow.contains(Overflow::Int16));

        let data = string_to_binary("65536", info(NumberKind::Decimal));
        assert!(data.overflow.contains(Overflow::U16));
        assert!(data.overflow.contains(Overflow::Int16));
        assert!(!data.overflow.contains(Overflow::Int32));

        let data = string_to_binary(
            "18446744073709551616",
            info(NumberKind::Decimal),
        );
        assert!(data.overflow.contains(Overflow::U64));
        assert!(data.overflow.contains(Overflow::Int64));
        assert_eq!(data.bits, 0); // truncated image
    }

    #[test]
    fn floating_conversion() {
        let data = string_to_binary("1.5", info(NumberKind::FpDouble));
        assert_eq!(f64::from_bits(data.bits), 1.5);
        assert!(data.overflow.is_empty());

        // 0.1 is not representable in binary: mantissa rounding on both widths
        let data = string_to_binary("0.1", info(NumberKind::FpDouble));
        assert!(data.overflow.contains(Overflow::Fp64Mantissa));
        assert!(data.overflow.contains(Overflow::Fp32Mantissa));

        // exceeds f32 exponent range only
        let data = string_to_binary("1e100", info(NumberKind::FpDouble));
        assert!(data.overflow.contains(Overflow::Fp32Exponent));
        assert!(!data.overflow.contains(Overflow::Fp64Exponent));

        let data = string_to_binary("1e400", info(NumberKind::FpDouble));
        assert!(data.overflow.contains(Overflow::Fp64Exponent));
    }

    #[test]
    fn character_literals() {
        assert_eq!(char_literal_value("'a'").bits, 'a' as u64);
        assert_eq!(char_literal_value("'\\n'").bits, '\n' as u64);
        assert_eq!(char_literal_value("'中'").bits, '中' as u64);
        assert!(
            char_literal_value("'ab'").overflow.contains(Overflow::U16)
        );
    }

    #[test]
    fn string_literals() {
        let narrow = string_literal_stream("\"ab\\n\"");
        assert_eq!(narrow.stream, vec![b'a', b'b', b'\n']);
        assert!(!narrow.wide_char);

        let wide = string_literal_stream("\"a中\"");
        assert!(wide.wide_char);
        assert_eq!(wide.stream.len(), 4);
    }
}
