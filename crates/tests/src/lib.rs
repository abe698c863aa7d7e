//! Cross-crate integration tests

#[cfg(test)]
mod pipeline_integration;
