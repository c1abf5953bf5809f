//! 身份与角色
//!
//! 角色在会话创建时确定：创建房间的一方是房主，输入房间号加入的一方是客人。

use rand::Rng;
use serde::{Deserialize, Serialize};

use protocol::{GomokuError, RoomCode, Stone, MAX_NICKNAME_LEN};

/// 本地角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Host => "房主",
            Role::Guest => "客人",
        }
    }
}

/// 验证昵称，返回去除首尾空白后的昵称
pub fn validate_name(name: &str) -> Result<String, GomokuError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GomokuError::NicknameEmpty);
    }
    let len = name.chars().count();
    if len > MAX_NICKNAME_LEN {
        return Err(GomokuError::NicknameTooLong {
            len,
            max: MAX_NICKNAME_LEN,
        });
    }
    Ok(name.to_string())
}

/// 会话身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    role: Role,
    local_name: String,
    opponent_name: Option<String>,
    room_code: RoomCode,
}

impl Identity {
    /// 创建身份，昵称必须合法
    pub fn new(role: Role, local_name: &str, room_code: RoomCode) -> Result<Self, GomokuError> {
        Ok(Self {
            role,
            local_name: validate_name(local_name)?,
            opponent_name: None,
            room_code,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn opponent_name(&self) -> Option<&str> {
        self.opponent_name.as_deref()
    }

    /// 对手昵称，未知时返回占位名
    pub fn opponent_display(&self) -> &str {
        self.opponent_name.as_deref().unwrap_or("对手")
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// 记录对手昵称，空白昵称忽略；返回是否有变化
    pub fn set_opponent_name(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.opponent_name.as_deref() == Some(name) {
            return false;
        }
        let name: String = name.chars().take(MAX_NICKNAME_LEN).collect();
        self.opponent_name = Some(name);
        true
    }

    /// 换连接时清除对手信息
    pub fn clear_opponent(&mut self) {
        self.opponent_name = None;
    }

    /// 更新显示的房间号；返回是否有变化
    pub fn set_room_code(&mut self, code: RoomCode) -> bool {
        if self.room_code == code {
            return false;
        }
        self.room_code = code;
        true
    }
}

/// 棋色分配：房主是否执黑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorAssignment {
    pub host_is_black: bool,
}

impl ColorAssignment {
    pub fn new(host_is_black: bool) -> Self {
        Self { host_is_black }
    }

    /// 房主决定棋色：有偏好时按偏好，否则各一半概率
    pub fn roll<R: Rng + ?Sized>(preferred: Option<Stone>, rng: &mut R) -> Self {
        let host_is_black = match preferred {
            Some(stone) => stone == Stone::Black,
            None => rng.gen_bool(0.5),
        };
        Self { host_is_black }
    }

    /// 本地棋色
    pub fn local_color(&self, role: Role) -> Stone {
        if role.is_host() == self.host_is_black {
            Stone::Black
        } else {
            Stone::White
        }
    }

    /// 对手棋色
    pub fn remote_color(&self, role: Role) -> Stone {
        self.local_color(role).opponent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn code() -> RoomCode {
        RoomCode::parse("AB12C9").unwrap()
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  小明 ").unwrap(), "小明");
        assert_eq!(validate_name("   "), Err(GomokuError::NicknameEmpty));
        assert_eq!(
            validate_name(&"棋".repeat(21)),
            Err(GomokuError::NicknameTooLong { len: 21, max: 20 })
        );
        assert!(validate_name(&"棋".repeat(20)).is_ok());
    }

    #[test]
    fn test_identity_requires_name() {
        assert!(Identity::new(Role::Host, "", code()).is_err());
        let id = Identity::new(Role::Guest, "客人", code()).unwrap();
        assert_eq!(id.role(), Role::Guest);
        assert_eq!(id.opponent_display(), "对手");
    }

    #[test]
    fn test_opponent_name_updates() {
        let mut id = Identity::new(Role::Host, "房主", code()).unwrap();
        assert!(id.set_opponent_name(" 客人 "));
        assert!(!id.set_opponent_name("客人"));
        assert!(!id.set_opponent_name(""));
        assert_eq!(id.opponent_name(), Some("客人"));
        id.clear_opponent();
        assert_eq!(id.opponent_name(), None);
    }

    #[test]
    fn test_colors_are_complementary() {
        for host_is_black in [true, false] {
            let assignment = ColorAssignment::new(host_is_black);
            for role in [Role::Host, Role::Guest] {
                assert_ne!(assignment.local_color(role), assignment.remote_color(role));
            }
            // 双方看到的本地棋色互补
            assert_ne!(
                assignment.local_color(Role::Host),
                assignment.local_color(Role::Guest)
            );
            assert_eq!(
                assignment.local_color(Role::Host),
                assignment.remote_color(Role::Guest)
            );
        }
    }

    #[test]
    fn test_roll_respects_preference() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert!(ColorAssignment::roll(Some(Stone::Black), &mut rng).host_is_black);
            assert!(!ColorAssignment::roll(Some(Stone::White), &mut rng).host_is_black);
        }
    }

    #[test]
    fn test_roll_random_hits_both() {
        let mut rng = StdRng::seed_from_u64(42);
        let rolls: Vec<bool> = (0..64)
            .map(|_| ColorAssignment::roll(None, &mut rng).host_is_black)
            .collect();
        assert!(rolls.contains(&true));
        assert!(rolls.contains(&false));
    }
}
