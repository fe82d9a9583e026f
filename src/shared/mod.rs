pub mod constants;
pub mod context;
pub mod types;

#[cfg(test)]
pub mod test_helpers;
