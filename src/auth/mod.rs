pub mod middleware;
pub mod role;
