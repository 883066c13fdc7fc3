// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/text.rs - OCR 文本清洗
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use crate::config::DEFAULT_MAX_NORMALIZED_LENGTH;

/// OCR 常见的字母/数字混淆
fn substitute(c: char) -> char {
  match c {
    'O' | 'o' => '0',
    'B' | 'b' => '8',
    'I' | 'i' | 'L' | 'l' => '1',
    other => other,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextNormalizer {
  max_len: usize,
}

impl Default for TextNormalizer {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_NORMALIZED_LENGTH)
  }
}

impl TextNormalizer {
  pub fn new(max_len: usize) -> Self {
    Self { max_len }
  }

  /// 替换混淆字符，去掉空格和括号，只保留末尾 `max_len` 个字符
  pub fn clean(&self, raw: &str) -> String {
    let cleaned: String = raw
      .chars()
      .map(substitute)
      .filter(|c| !matches!(c, ' ' | '(' | ')'))
      .collect();
    let cleaned = cleaned.trim();

    let count = cleaned.chars().count();
    if count > self.max_len {
      cleaned.chars().skip(count - self.max_len).collect()
    } else {
      cleaned.to_string()
    }
  }

  /// 清洗后只接受非空的纯数字文本
  pub fn normalize(&self, raw: &str) -> Option<String> {
    let text = self.clean(raw);
    is_numeric(&text).then_some(text)
  }
}

pub fn is_numeric(text: &str) -> bool {
  !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

pub fn clean(raw: &str) -> String {
  TextNormalizer::default().clean(raw)
}

pub fn normalize(raw: &str) -> Option<String> {
  TextNormalizer::default().normalize(raw)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn confusable_letters_become_digits() {
    assert_eq!(clean("O1l2I3"), "011213");
    assert_eq!(clean("oBbiL"), "08811");
    assert_eq!(normalize("O1l2I3").as_deref(), Some("011213"));
  }

  #[test]
  fn strips_spaces_and_parentheses() {
    assert_eq!(clean(" (12 34) "), "1234");
    assert_eq!(clean("\t5678\n"), "5678");
  }

  #[test]
  fn keeps_trailing_twelve_characters() {
    assert_eq!(clean("123456789012345"), "456789012345");
    assert_eq!(clean("123456789012"), "123456789012");
  }

  #[test]
  fn rejects_non_numeric_and_blank() {
    assert_eq!(clean("AB"), "A8");
    assert_eq!(normalize("AB"), None);
    assert_eq!(normalize(""), None);
    assert_eq!(normalize("  ( ) "), None);
    assert_eq!(normalize("12\n34"), None);
    assert_eq!(normalize("١٢٣"), None);
  }

  #[test]
  fn truncation_happens_before_validation() {
    // 前缀杂质被截掉后剩下纯数字
    assert_eq!(normalize("User:123456789012").as_deref(), Some("123456789012"));
  }

  #[test]
  fn custom_length() {
    let normalizer = TextNormalizer::new(4);
    assert_eq!(normalizer.clean("987654"), "7654");
  }
}
