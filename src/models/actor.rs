use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    /// Business the actor works for. Required for staff and owners.
    pub business_id: Option<String>,
}

impl Actor {
    pub fn guest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Guest,
            business_id: None,
        }
    }

    pub fn staff(id: impl Into<String>, business_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Staff,
            business_id: Some(business_id.into()),
        }
    }

    pub fn owner(id: impl Into<String>, business_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Owner,
            business_id: Some(business_id.into()),
        }
    }

    pub fn platform_admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::PlatformAdmin,
            business_id: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }

    /// Staff and owners share the same authority over a booking.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Owner)
    }

    pub fn works_for(&self, business_id: &str) -> bool {
        self.is_staff() && self.business_id.as_deref() == Some(business_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Staff,
    Owner,
    PlatformAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Staff => "staff",
            Role::Owner => "owner",
            Role::PlatformAdmin => "platform_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guest" => Some(Role::Guest),
            "staff" => Some(Role::Staff),
            "owner" => Some(Role::Owner),
            "platform_admin" | "admin" => Some(Role::PlatformAdmin),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staff_scoped_to_business() {
        let staff = Actor::staff("s1", "B1");
        assert!(staff.works_for("B1"));
        assert!(!staff.works_for("B2"));
        assert!(Actor::owner("o1", "B1").works_for("B1"));
        assert!(!Actor::guest("g1").works_for("B1"));
        assert!(!Actor::platform_admin("a1").is_staff());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Staff"), Some(Role::Staff));
        assert_eq!(Role::parse("admin"), Some(Role::PlatformAdmin));
        assert_eq!(Role::parse("janitor"), None);
    }
}
