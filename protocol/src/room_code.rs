//! 房间号
//!
//! 房间号同时也是房主在传输层上绑定的地址，客人直接用它寻址房主。
//! 6 位 `[A-Z0-9]` 约 2.2×10^9 种组合，不保证唯一：冲突由传输层在绑定时报告。

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};
use crate::error::GomokuError;

/// 6 位房间号
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// 随机生成房间号
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let alphabet = ROOM_CODE_ALPHABET.as_bytes();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        Self(code)
    }

    /// 解析用户输入的房间号（去除首尾空白并转为大写）
    pub fn parse(input: &str) -> Result<Self, GomokuError> {
        let code = input.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(GomokuError::InvalidRoomCode {
                reason: format!("expected {} characters, got {}", ROOM_CODE_LEN, len),
            });
        }
        if let Some((index, ch)) = code
            .chars()
            .enumerate()
            .find(|(_, ch)| !ROOM_CODE_ALPHABET.contains(*ch))
        {
            return Err(GomokuError::InvalidRoomCode {
                reason: format!("invalid character '{}' at position {}", ch, index),
            });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = GomokuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = GomokuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert!(code.as_str().chars().all(|c| ROOM_CODE_ALPHABET.contains(c)));
            // 生成的房间号一定能被解析
            assert_eq!(RoomCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn test_parse_normalizes() {
        let code = RoomCode::parse("  ab12c9 ").unwrap();
        assert_eq!(code.as_str(), "AB12C9");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(matches!(
            RoomCode::parse("AB12C"),
            Err(GomokuError::InvalidRoomCode { .. })
        ));
        assert!(RoomCode::parse("AB12C9X").is_err());
        assert!(RoomCode::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_chars() {
        assert!(RoomCode::parse("AB-2C9").is_err());
        assert!(RoomCode::parse("房间号一二三").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let code: RoomCode = serde_json::from_str("\"AB12C9\"").unwrap();
        assert_eq!(code.as_str(), "AB12C9");
        assert!(serde_json::from_str::<RoomCode>("\"AB\"").is_err());
    }
}
