pub mod health;
pub mod session;
pub mod trading;
pub mod views;
