// Library exports for the publish tool and integration tests

pub mod audio_codec;
pub mod cloud_storage;
pub mod config;
pub mod db;
pub mod identity;
pub mod saga;
pub mod uploads;
pub mod watermark;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
