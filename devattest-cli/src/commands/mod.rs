pub mod assert;
pub mod enroll;
pub mod inspect;
