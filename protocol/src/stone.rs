//! 棋子与坐标定义

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;
use crate::error::GomokuError;

/// 棋子颜色（黑棋先手）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stone {
    /// 黑棋（先手）
    Black,
    /// 白棋（后手）
    White,
}

impl Stone {
    /// 获取对方颜色
    pub fn opponent(&self) -> Stone {
        match self {
            Stone::Black => Stone::White,
            Stone::White => Stone::Black,
        }
    }

    /// 控制台显示字符
    pub fn display_char(&self) -> char {
        match self {
            Stone::Black => '●',
            Stone::White => '○',
        }
    }

    /// 中文名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Stone::Black => "黑棋",
            Stone::White => "白棋",
        }
    }
}

impl std::fmt::Display for Stone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stone::Black => f.write_str("black"),
            Stone::White => f.write_str("white"),
        }
    }
}

/// 棋盘位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// 行 (0-14)
    pub row: u8,
    /// 列 (0-14)
    pub col: u8,
}

impl Position {
    /// 创建新位置
    pub fn new(row: u8, col: u8) -> Option<Self> {
        if (row as usize) < BOARD_SIZE && (col as usize) < BOARD_SIZE {
            Some(Self { row, col })
        } else {
            None
        }
    }

    /// 从任意整数坐标创建，越界返回错误
    pub fn try_new(row: i32, col: i32) -> Result<Self, GomokuError> {
        let in_range = |v: i32| v >= 0 && (v as usize) < BOARD_SIZE;
        if in_range(row) && in_range(col) {
            Ok(Self {
                row: row as u8,
                col: col as u8,
            })
        } else {
            Err(GomokuError::InvalidPosition { row, col })
        }
    }

    /// 创建新位置（不检查边界，内部使用）
    pub const fn new_unchecked(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// 检查位置是否在棋盘内
    pub fn is_valid(&self) -> bool {
        (self.row as usize) < BOARD_SIZE && (self.col as usize) < BOARD_SIZE
    }

    /// 获取偏移后的位置
    pub fn offset(&self, d_row: i32, d_col: i32) -> Option<Position> {
        let row = self.row as i32 + d_row;
        let col = self.col as i32 + d_col;
        Position::try_new(row, col).ok()
    }

    /// 转换为数组索引
    pub fn to_index(&self) -> usize {
        self.row as usize * BOARD_SIZE + self.col as usize
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_valid() {
        assert!(Position::new(0, 0).is_some());
        assert!(Position::new(14, 14).is_some());
        assert!(Position::new(15, 0).is_none());
        assert!(Position::new(0, 15).is_none());
    }

    #[test]
    fn test_position_try_new() {
        assert_eq!(Position::try_new(7, 7), Ok(Position::new_unchecked(7, 7)));
        assert_eq!(
            Position::try_new(-1, 3),
            Err(GomokuError::InvalidPosition { row: -1, col: 3 })
        );
    }

    #[test]
    fn test_position_offset() {
        let pos = Position::new_unchecked(0, 14);
        assert_eq!(pos.offset(1, -1), Some(Position::new_unchecked(1, 13)));
        assert_eq!(pos.offset(-1, 0), None);
        assert_eq!(pos.offset(0, 1), None);
    }

    #[test]
    fn test_stone_opponent() {
        assert_eq!(Stone::Black.opponent(), Stone::White);
        assert_eq!(Stone::White.opponent(), Stone::Black);
    }

    #[test]
    fn test_stone_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Stone::Black).unwrap(), "\"black\"");
        let white: Stone = serde_json::from_str("\"white\"").unwrap();
        assert_eq!(white, Stone::White);
    }
}
