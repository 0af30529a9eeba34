//! Method body headers and the CIL instruction stream.

use crate::error::{MetadataError, Result};
use crate::reader::{read_u16, read_u32, read_u8, slice};

const TINY_FORMAT: u8 = 0x2;
const FAT_FORMAT: u8 = 0x3;
const FORMAT_MASK: u8 = 0x3;

const TWO_BYTE_PREFIX: u8 = 0xFE;
const SWITCH: u8 = 0x45;
const LDSTR: u8 = 0x72;

/// Table number carried in the top byte of a user string token.
const USER_STRING_TOKEN: u32 = 0x70;

/// Borrow the IL code of a method body, skipping its tiny or fat header.
pub(crate) fn method_code(body: &[u8]) -> Result<&[u8]> {
    let first = read_u8(body, 0)?;
    match first & FORMAT_MASK {
        TINY_FORMAT => slice(body, 1, usize::from(first >> 2)),
        FAT_FORMAT => {
            let flags = read_u16(body, 0)?;
            let header_len = usize::from(flags >> 12) * 4;
            let code_len = read_u32(body, 4)? as usize;
            slice(body, header_len, code_len)
        }
        _ => Err(MetadataError::UnsupportedMethodHeader { byte: first }),
    }
}

/// Collect the `#US` offsets of every `ldstr` operand, in instruction order.
pub(crate) fn user_string_offsets(code: &[u8]) -> Result<Vec<u32>> {
    let mut offsets = Vec::new();
    let mut position = 0;
    while position < code.len() {
        let start = position;
        let opcode = read_u8(code, position)?;
        position += 1;

        let operand = if opcode == TWO_BYTE_PREFIX {
            let second = read_u8(code, position)?;
            position += 1;
            extended_operand_size(second).ok_or(MetadataError::InvalidInstruction {
                opcode: second,
                offset: start,
            })?
        } else if opcode == SWITCH {
            let targets = read_u32(code, position)? as usize;
            targets.saturating_add(1).saturating_mul(4)
        } else {
            operand_size(opcode).ok_or(MetadataError::InvalidInstruction {
                opcode,
                offset: start,
            })?
        };

        if opcode == LDSTR {
            let token = read_u32(code, position)?;
            if token >> 24 == USER_STRING_TOKEN {
                offsets.push(token & 0x00FF_FFFF);
            }
        }
        // Validates the operand lies inside the code before skipping it.
        slice(code, position, operand)?;
        position += operand;
    }
    Ok(offsets)
}

/// Operand width of a one-byte opcode, `None` when the byte is unassigned.
const fn operand_size(opcode: u8) -> Option<usize> {
    match opcode {
        0x00..=0x0D | 0x14..=0x1E | 0x25 | 0x26 | 0x2A => Some(0),
        0x0E..=0x13 | 0x1F | 0x2B..=0x37 | 0xDE => Some(1),
        0x20 | 0x22 | 0x27..=0x29 | 0x38..=0x44 => Some(4),
        0x21 | 0x23 => Some(8),
        0x46..=0x6E | 0x76 | 0x7A | 0x82..=0x8B | 0x8E | 0x90..=0xA2 => Some(0),
        0x6F..=0x75 | 0x79 | 0x7B..=0x81 | 0x8C | 0x8D | 0x8F | 0xA3..=0xA5 => Some(4),
        0xB3..=0xBA | 0xC3 | 0xD1..=0xDC | 0xDF | 0xE0 => Some(0),
        0xC2 | 0xC6 | 0xD0 | 0xDD => Some(4),
        _ => None,
    }
}

/// Operand width of a `0xFE`-prefixed opcode.
const fn extended_operand_size(opcode: u8) -> Option<usize> {
    match opcode {
        0x00..=0x05 | 0x0F | 0x11 | 0x13 | 0x14 | 0x17 | 0x18 | 0x1A | 0x1D | 0x1E => Some(0),
        0x12 | 0x19 => Some(1),
        0x09..=0x0E => Some(2),
        0x06 | 0x07 | 0x15 | 0x16 | 0x1C => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn tiny_header_encodes_length_in_upper_bits() {
        // ldnull; ret
        let body = [(2 << 2) | TINY_FORMAT, 0x14, 0x2A, 0xFF];
        assert_eq!(method_code(&body), Ok(&[0x14, 0x2A][..]));
    }

    #[test]
    fn fat_header_reads_size_field() {
        let mut body = vec![0x13, 0x30, 0x08, 0x00];
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0x2A);
        assert_eq!(method_code(&body), Ok(&[0x2A][..]));
    }

    #[test]
    fn unknown_header_format_is_rejected() {
        assert_eq!(
            method_code(&[0x01]),
            Err(MetadataError::UnsupportedMethodHeader { byte: 0x01 })
        );
    }

    #[test]
    fn collects_ldstr_operands_in_order() {
        let mut code = vec![LDSTR];
        code.extend_from_slice(&0x7000_0001u32.to_le_bytes());
        code.push(0x26); // pop
        code.push(LDSTR);
        code.extend_from_slice(&0x7000_0010u32.to_le_bytes());
        code.push(0x2A);
        assert_eq!(user_string_offsets(&code), Ok(vec![0x01, 0x10]));
    }

    #[test]
    fn switch_operands_are_skipped() {
        let mut code = vec![SWITCH];
        code.extend_from_slice(&2u32.to_le_bytes());
        // Jump targets whose bytes look like an ldstr.
        code.extend_from_slice(&[LDSTR, 0x01, 0x00, 0x00, 0x70, 0x00, 0x00, 0x00]);
        code.push(LDSTR);
        code.extend_from_slice(&0x7000_0005u32.to_le_bytes());
        assert_eq!(user_string_offsets(&code), Ok(vec![0x05]));
    }

    #[rstest]
    #[case::ldloc(&[TWO_BYTE_PREFIX, 0x0C, 0x72, 0x00])]
    #[case::ldftn(&[TWO_BYTE_PREFIX, 0x06, 0x72, 0x01, 0x00, 0x70])]
    #[case::ceq(&[TWO_BYTE_PREFIX, 0x01])]
    fn two_byte_opcodes_consume_their_operands(#[case] code: &[u8]) {
        assert_eq!(user_string_offsets(code), Ok(Vec::new()));
    }

    #[test]
    fn unassigned_opcode_is_an_error() {
        assert_eq!(
            user_string_offsets(&[0x00, 0x24]),
            Err(MetadataError::InvalidInstruction {
                opcode: 0x24,
                offset: 1
            })
        );
    }

    #[test]
    fn truncated_operand_is_reported() {
        assert!(matches!(
            user_string_offsets(&[0x20, 0x01]),
            Err(MetadataError::Truncated { .. })
        ));
    }
}
