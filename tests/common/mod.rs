#![allow(dead_code)]

pub mod linear_model;
pub mod phantom;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
