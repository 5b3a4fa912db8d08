//! 定长 base-32 短码编码
//!
//! 短码是基于大写字母表的 32 进制数，字母表去掉了易混淆的数字
//! `0`、`1`、`8`、`9`。每个字符 5 bit，长度为 `L` 的短码可表示 `32^L` 个值。

use crate::errors::{OctolinkError, Result};

pub const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
pub const BASE: u64 = 32;
pub const MIN_LENGTH: usize = 4;
pub const MAX_LENGTH: usize = 6;

/// 反查表：ASCII 字节 -> 数值（非法字符为 0xFF）
const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [0xFFu8; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        let upper = ALPHABET[i];
        table[upper as usize] = i as u8;
        table[upper.to_ascii_lowercase() as usize] = i as u8;
        i += 1;
    }
    table
}

/// 将请求的长度限制在支持范围内
///
/// 超出范围时回落到 [`MIN_LENGTH`]，而不是最近的边界
#[inline]
fn effective_length(length: usize) -> usize {
    if (MIN_LENGTH..=MAX_LENGTH).contains(&length) {
        length
    } else {
        MIN_LENGTH
    }
}

/// 将 `n` 编码为恰好 `length` 个字符，高位在前
///
/// 超出 `32^length` 的高位被丢弃
pub fn encode(mut n: u64, length: usize) -> String {
    let length = effective_length(length);
    let mut buf = [ALPHABET[0]; MAX_LENGTH];
    for slot in buf[..length].iter_mut().rev() {
        *slot = ALPHABET[(n % BASE) as usize];
        n /= BASE;
    }
    // 字母表全是 ASCII
    buf[..length].iter().map(|&b| b as char).collect()
}

/// 将短码解码回整数（不区分大小写）
pub fn decode(code: &str) -> Result<u64> {
    let mut value: u64 = 0;
    for (pos, byte) in code.bytes().enumerate() {
        let digit = DECODE_TABLE[byte as usize];
        if digit == 0xFF {
            return Err(OctolinkError::invalid_input(format!(
                "invalid character '{}' at position {} in code '{}'",
                byte as char, pos, code
            )));
        }
        value = value.wrapping_mul(BASE).wrapping_add(u64::from(digit));
    }
    Ok(value)
}

/// `code` 长度受支持且只包含字母表字符
pub fn is_valid(code: &str) -> bool {
    (MIN_LENGTH..=MAX_LENGTH).contains(&code.len())
        && code.bytes().all(|b| DECODE_TABLE[b as usize] != 0xFF)
}

/// 长度为 `length` 时可用的短码数量（`32^length`）
pub fn max_capacity(length: usize) -> u64 {
    BASE.pow(effective_length(length) as u32)
}
