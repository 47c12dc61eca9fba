pub mod approval;
pub mod work;
