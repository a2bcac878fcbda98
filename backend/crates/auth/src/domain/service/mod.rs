//! Domain services

pub mod permission_calculator;

pub use permission_calculator::{
    EffectivePermissions, PermissionCalculator, PermissionEntry, PermissionScope,
    PermissionSource, PermissionSummary,
};
