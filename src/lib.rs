//! 会话与设备信任认证服务
//! OTP 登录、可撤销会话、受信任设备、管理员模拟身份与审计

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod otp;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
