//! Business logic services layer

pub mod audit_service;
pub mod auth_service;
pub mod device_service;
pub mod impersonation_service;
pub mod session_service;
pub mod user_service;

pub use audit_service::AuditService;
pub use auth_service::AuthService;
pub use device_service::DeviceService;
pub use impersonation_service::ImpersonationService;
pub use session_service::SessionService;
pub use user_service::UserService;
