//! 数据模型模块
//! 用户、会话、受信任设备、OTP 尝试与审计日志

pub mod audit;
pub mod auth;
pub mod device;
pub mod otp;
pub mod session;
pub mod user;
