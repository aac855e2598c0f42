use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnAttendance,
    SignWaiver,

    ViewMemberAttendance,
    ManageSchedule,
    ViewAnalytics,

    ManageTemplates,
    ManageGym,
    ManageWaivers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Member,
    Instructor,
    Owner,
}

static MEMBER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnAttendance);
    permissions.insert(Permission::SignWaiver);

    permissions
});

static INSTRUCTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(MEMBER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewMemberAttendance);
    permissions.insert(Permission::ManageSchedule);
    permissions.insert(Permission::ViewAnalytics);

    permissions
});

static OWNER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(INSTRUCTOR_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageTemplates);
    permissions.insert(Permission::ManageGym);
    permissions.insert(Permission::ManageWaivers);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Member => &MEMBER_PERMISSIONS,
            Role::Instructor => &INSTRUCTOR_PERMISSIONS,
            Role::Owner => &OWNER_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Instructor => "instructor",
            Role::Owner => "owner",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "member" => Ok(Role::Member),
            "instructor" => Ok(Role::Instructor),
            "owner" => Ok(Role::Owner),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
