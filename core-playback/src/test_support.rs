//! Shared mocks for unit tests.

use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::engine::AudioEngine;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::normalization::VolumeNormalizer;
use mockall::mock;

mock! {
    pub Engine {}

    #[async_trait]
    impl AudioEngine for Engine {
        async fn load(&self, path: &str) -> BridgeResult<()>;
        async fn play(&self) -> BridgeResult<()>;
        async fn pause(&self) -> BridgeResult<()>;
        async fn stop(&self) -> BridgeResult<()>;
        async fn seek(&self, seconds: f64) -> BridgeResult<()>;
        async fn set_volume(&self, volume: f32) -> BridgeResult<()>;
        async fn get_duration(&self) -> BridgeResult<f64>;
        async fn get_position(&self) -> BridgeResult<f64>;
        async fn is_playing(&self) -> BridgeResult<bool>;
        async fn is_finished(&self) -> BridgeResult<bool>;
        async fn is_device_available(&self) -> BridgeResult<bool>;
        async fn has_device_changed(&self) -> BridgeResult<bool>;
        async fn get_inactive_duration(&self) -> BridgeResult<Duration>;
        async fn recover(&self) -> BridgeResult<bool>;
    }
}

mock! {
    pub Normalizer {}

    #[async_trait]
    impl VolumeNormalizer for Normalizer {
        async fn apply_gain(&self, track_id: &str, path: &str) -> BridgeResult<()>;
    }
}
