//! 棋盘状态

use serde::{Deserialize, Serialize};

use crate::constants::{BOARD_SIZE, WIN_LENGTH};
use crate::error::GomokuError;
use crate::stone::{Position, Stone};

/// 四个扫描方向：水平、垂直、主对角线（↘）、反对角线（↗）
const DIRECTIONS: [(i32, i32); 4] = [(0, 1), (1, 0), (1, 1), (-1, 1)];

/// 15x15 棋盘
///
/// 落子后不会被移除，只有整盘重置才会清空。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// 索引为 row * 15 + col，使用 Vec 以支持 serde
    cells: Vec<Option<Stone>>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            cells: vec![None; BOARD_SIZE * BOARD_SIZE],
        }
    }

    /// 获取指定位置的棋子
    pub fn get(&self, pos: Position) -> Option<Stone> {
        if pos.is_valid() {
            self.cells[pos.to_index()]
        } else {
            None
        }
    }

    /// 落子，目标位置非空时返回错误且不修改棋盘
    pub fn place(&mut self, pos: Position, stone: Stone) -> Result<(), GomokuError> {
        if !pos.is_valid() {
            return Err(GomokuError::InvalidPosition {
                row: pos.row as i32,
                col: pos.col as i32,
            });
        }
        let cell = &mut self.cells[pos.to_index()];
        if cell.is_some() {
            return Err(GomokuError::Occupied {
                row: pos.row,
                col: pos.col,
            });
        }
        *cell = Some(stone);
        Ok(())
    }

    /// 检查刚落下的棋子是否连成五子
    ///
    /// 每个方向向前、向后各最多数 4 格，包含落子本身达到 5 即获胜。
    pub fn check_win(&self, pos: Position) -> bool {
        let Some(stone) = self.get(pos) else {
            return false;
        };

        DIRECTIONS.iter().any(|&(d_row, d_col)| {
            let forward = self.run_length(pos, stone, d_row, d_col);
            let backward = self.run_length(pos, stone, -d_row, -d_col);
            1 + forward + backward >= WIN_LENGTH
        })
    }

    /// 沿一个方向统计连续同色棋子数（不含起点）
    fn run_length(&self, from: Position, stone: Stone, d_row: i32, d_col: i32) -> usize {
        let mut count = 0;
        let mut current = from;
        while count < WIN_LENGTH - 1 {
            match current.offset(d_row, d_col) {
                Some(next) if self.get(next) == Some(stone) => {
                    count += 1;
                    current = next;
                }
                _ => break,
            }
        }
        count
    }

    /// 清空棋盘（新对局 / 重新开始）
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = None);
    }

    /// 棋盘上的棋子数
    pub fn stone_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// 棋盘是否已下满
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| c.is_some())
    }

    /// 按行返回所有格子（供界面渲染）
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Stone>]> {
        self.cells.chunks(BOARD_SIZE)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: u8, col: u8) -> Position {
        Position::new_unchecked(row, col)
    }

    /// 从 start 开始沿方向放置 n 颗同色棋子，返回最后一颗的位置
    fn place_run(board: &mut Board, start: Position, d: (i32, i32), n: usize, stone: Stone) -> Position {
        let mut last = start;
        for i in 0..n {
            let p = start.offset(d.0 * i as i32, d.1 * i as i32).unwrap();
            board.place(p, stone).unwrap();
            last = p;
        }
        last
    }

    #[test]
    fn test_place_and_occupied() {
        let mut board = Board::empty();
        assert!(board.place(pos(7, 7), Stone::Black).is_ok());
        assert_eq!(board.get(pos(7, 7)), Some(Stone::Black));

        let result = board.place(pos(7, 7), Stone::White);
        assert_eq!(result, Err(GomokuError::Occupied { row: 7, col: 7 }));
        // 棋盘未被修改
        assert_eq!(board.get(pos(7, 7)), Some(Stone::Black));
        assert_eq!(board.stone_count(), 1);
    }

    #[test]
    fn test_place_out_of_bounds() {
        let mut board = Board::empty();
        assert!(board.place(pos(15, 0), Stone::Black).is_err());
        assert_eq!(board.stone_count(), 0);
    }

    #[test]
    fn test_five_in_every_direction() {
        for d in DIRECTIONS {
            let mut board = Board::empty();
            let start = if d.0 < 0 { pos(10, 3) } else { pos(3, 3) };
            let last = place_run(&mut board, start, d, 5, Stone::Black);
            assert!(board.check_win(last), "direction {:?}", d);
            // 从中间落子也能判定
            assert!(board.check_win(start.offset(d.0 * 2, d.1 * 2).unwrap()));
        }
    }

    #[test]
    fn test_four_is_not_a_win() {
        for d in DIRECTIONS {
            let mut board = Board::empty();
            let start = if d.0 < 0 { pos(10, 3) } else { pos(3, 3) };
            let last = place_run(&mut board, start, d, 4, Stone::White);
            assert!(!board.check_win(last), "direction {:?}", d);
        }
    }

    #[test]
    fn test_broken_run_is_not_a_win() {
        let mut board = Board::empty();
        for col in [0, 1, 3, 4, 5] {
            board.place(pos(0, col), Stone::Black).unwrap();
        }
        board.place(pos(0, 2), Stone::White).unwrap();
        assert!(!board.check_win(pos(0, 5)));
    }

    #[test]
    fn test_overline_counts_as_win() {
        let mut board = Board::empty();
        let last = place_run(&mut board, pos(14, 0), (0, 1), 6, Stone::Black);
        assert!(board.check_win(last));
    }

    #[test]
    fn test_edge_does_not_wrap() {
        let mut board = Board::empty();
        // 行尾三颗 + 下一行行首两颗：索引连续但不构成五连
        for col in 12..15 {
            board.place(pos(3, col), Stone::Black).unwrap();
        }
        for col in 0..2 {
            board.place(pos(4, col), Stone::Black).unwrap();
        }
        assert!(!board.check_win(pos(3, 14)));
        assert!(!board.check_win(pos(4, 0)));
    }

    #[test]
    fn test_check_win_on_empty_cell() {
        let board = Board::empty();
        assert!(!board.check_win(pos(7, 7)));
    }

    #[test]
    fn test_reset() {
        let mut board = Board::empty();
        board.place(pos(1, 1), Stone::Black).unwrap();
        board.place(pos(2, 2), Stone::White).unwrap();
        board.reset();
        assert_eq!(board.stone_count(), 0);
        assert_eq!(board, Board::empty());
    }
}
