//! Role hierarchy: EMPLOYEE < MANAGER < ADMIN

use crate::models::user::Role;

impl Role {
    /// Integer privilege rank
    pub const fn rank(self) -> u8 {
        match self {
            Role::Employee => 1,
            Role::Manager => 2,
            Role::Admin => 3,
        }
    }

    pub const fn has_at_least(self, min: Role) -> bool {
        self.rank() >= min.rank()
    }

    /// 只有 MANAGER 及以上可凭受信任设备静默续期
    pub const fn can_silent_login(self) -> bool {
        self.has_at_least(Role::Manager)
    }

    pub const fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}
