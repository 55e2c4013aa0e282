pub mod launch;
pub mod new;
pub mod tunnel;
