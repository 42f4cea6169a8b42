//! Integration tests for the receiver controller
//!
//! Each test serves a simulated radio on an ephemeral loopback port and
//! drives it through the public controller API:
//! - Discovery and channel composition
//! - Tuning, rate selection and enabling a channel
//! - Parent/child retuning
//! - FFT channel allocation
//! - Recovery after a refused command

use rxctl_core::{ControlError, Controller, ControllerConfig, RxType};
use rxctl_protocol::ModuleId;
use rxctl_sim::{spawn_local, SimConfig, SimHandle};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Serve the default radio
    pub async fn sim() -> SimHandle {
        spawn_local(SimConfig::default()).await.unwrap()
    }

    /// Controller for `sim` with a short validation interval
    pub async fn controller(sim: &SimHandle) -> Controller {
        let mut config = ControllerConfig::new("127.0.0.1", sim.addr().port());
        config.validation.interval_ms = 5;
        Controller::connect(config).await.unwrap()
    }

    pub fn id(s: &str) -> ModuleId {
        s.parse().unwrap()
    }
}

use helpers::*;

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_channel_zero_is_disabled_with_an_output() {
    let sim = sim().await;
    let controller = controller(&sim).await;

    let channel = controller.channel(0).unwrap();
    assert_eq!(channel.rx_type(), RxType::Digital);
    assert_eq!(channel.tuner_id(), Some(&id("RCV:1")));

    let status = channel.status().await.unwrap();
    assert!(!status.enabled);
    let output = channel.output_status().await.unwrap().unwrap();
    assert!(!output.enabled);
    assert!(!output.destination.is_empty());
    let ip = channel.output().unwrap().ip_address().await.unwrap();
    assert!(!ip.is_empty());
    assert!(controller.output_pool().is_used(&id(&output.module)));
}

#[tokio::test]
async fn test_every_module_maps_back_to_its_channel() {
    let sim = sim().await;
    let controller = controller(&sim).await;
    for channel in controller.channels() {
        for module in channel.module_ids() {
            let found = controller.channel_by_id(&module).unwrap();
            assert_eq!(found.index(), channel.index(), "{module}");
        }
    }
    assert!(controller.channel_by_id(&id("OUT:16")).is_none());
}

// ============================================================================
// Tuning and enabling
// ============================================================================

#[tokio::test]
async fn test_tune_rate_and_enable() {
    let sim = sim().await;
    let controller = controller(&sim).await;

    controller.set_frequency(0, 100_000_000.0, false).await.unwrap();
    let channel = controller.channel(0).unwrap();
    assert_eq!(channel.frequency().await.unwrap(), 100_000_000.0);

    let rate = controller.set_sample_rate(0, 25_000_000.0).await.unwrap();
    assert_eq!(rate, 25_000_000.0);
    assert_eq!(channel.sample_rate().await.unwrap(), 25_000_000.0);

    channel.set_enable(true).await.unwrap();
    assert!(channel.status().await.unwrap().enabled);
    assert!(channel.output_status().await.unwrap().unwrap().enabled);
    assert_eq!(sim.with_radio(|r| r.is_enabled("WBDDC:1")), Some(true));
}

#[tokio::test]
async fn test_sample_rate_never_rounds_down() {
    let sim = sim().await;
    let controller = controller(&sim).await;
    let channel = controller.channel(0).unwrap();

    let err = channel.set_sample_rate(25_000_001.0, 0.0).await.unwrap_err();
    assert!(matches!(err, ControlError::InvalidValue { .. }), "{err}");
    let err = controller.set_sample_rate(0, 25_000_001.0).await.unwrap_err();
    assert!(matches!(err, ControlError::InvalidValue { .. }), "{err}");

    // both ends of the declared list are reachable
    assert_eq!(channel.set_sample_rate(25_000_000.0, 0.0).await.unwrap(), 25_000_000.0);
    assert_eq!(channel.set_sample_rate(50_000_000.0, 0.0).await.unwrap(), 50_000_000.0);
    assert!(channel.set_sample_rate(50_000_000.0 + 1.0, 0.0).await.is_err());
}

#[tokio::test]
async fn test_frequency_outside_range_is_refused() {
    let sim = sim().await;
    let controller = controller(&sim).await;
    let range = controller.channel(0).unwrap().frequency_range().await.unwrap();
    assert_eq!((range.min, range.max), (30_000_000.0, 3_000_000_000.0));
    assert!(controller.set_frequency(0, 3_000_000_001.0, false).await.is_err());
    assert!(controller.set_frequency(0, 3_000_000_000.0, false).await.is_ok());
}

// ============================================================================
// Parent/child retuning
// ============================================================================

#[tokio::test]
async fn test_child_out_of_passband_is_disabled() {
    let sim = sim().await;
    let controller = controller(&sim).await;
    assert_eq!(controller.channel(2).unwrap().parent(), Some(0));

    controller.set_frequency(0, 100_000_000.0, true).await.unwrap();
    let child = controller.channel(2).unwrap();
    child.set_frequency(101_000_000.0).await.unwrap();
    child.set_enable(true).await.unwrap();
    assert_eq!(child.frequency().await.unwrap(), 101_000_000.0);

    controller.set_frequency(0, 200_000_000.0, true).await.unwrap();
    assert_eq!(child.rf_offset(), 200_000_000.0);
    assert!(!child.enabled().await.unwrap());
    assert_eq!(sim.with_radio(|r| r.is_enabled("NBDDC:1")), Some(false));
}

#[tokio::test]
async fn test_child_in_passband_keeps_its_frequency() {
    let sim = sim().await;
    let controller = controller(&sim).await;

    controller.set_frequency(0, 100_000_000.0, true).await.unwrap();
    let child = controller.channel(2).unwrap();
    child.set_frequency(101_000_000.0).await.unwrap();

    controller.set_frequency(0, 110_000_000.0, true).await.unwrap();
    assert_eq!(child.rf_offset(), 110_000_000.0);
    assert_eq!(child.frequency().await.unwrap(), 101_000_000.0);
    // the sibling under the same parent moved along too
    assert_eq!(controller.channel(4).unwrap().rf_offset(), 110_000_000.0);
}

#[tokio::test]
async fn test_unreadable_child_does_not_strand_its_sibling() {
    let sim = sim().await;
    let controller = controller(&sim).await;

    controller.set_frequency(0, 100_000_000.0, true).await.unwrap();
    let sibling = controller.channel(2).unwrap();
    sibling.set_frequency(101_000_000.0).await.unwrap();
    assert_eq!(
        sim.with_radio(|r| r.force_value("NBDDC:3", "FRQ", "garbage")),
        Some(true)
    );

    let err = controller
        .set_frequency(0, 110_000_000.0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ParseFailure { .. }), "{err}");
    assert_eq!(controller.channel(0).unwrap().frequency().await.unwrap(), 110_000_000.0);

    assert_eq!(sibling.rf_offset(), 110_000_000.0);
    assert_eq!(sibling.frequency().await.unwrap(), 101_000_000.0);
    // the unreadable child is switched off under the new anchor
    assert_eq!(controller.channel(4).unwrap().rf_offset(), 110_000_000.0);
    assert_eq!(sim.with_radio(|r| r.is_enabled("NBDDC:3")), Some(false));
}

// ============================================================================
// FFT channels
// ============================================================================

#[tokio::test]
async fn test_fft_channel_round_trip() {
    let sim = sim().await;
    let mut controller = controller(&sim).await;
    let used_before = controller.fft_pool().used_count();

    let mut fft = controller.get_fft_channel().unwrap();
    assert_eq!(controller.fft_pool().used_count(), used_before + 1);
    controller.link_fft_channel(&mut fft, &id("WBDDC:1")).await.unwrap();
    assert_eq!(
        controller.get_fft_channel_of(&id("WBDDC:1")).await.unwrap().map(|f| f.id().clone()),
        Some(fft.id().clone())
    );
    fft.fft.set_enabled(true).await.unwrap();
    fft.output.set_enabled(true).await.unwrap();
    assert!(fft.status().await.unwrap().enabled);

    let fft_id = fft.id().clone();
    controller.save_fft_channel(fft).await.unwrap();
    assert_eq!(controller.fft_pool().used_count(), used_before);
    assert_eq!(sim.with_radio(|r| r.is_enabled("FFT:1")), Some(false));
    let sources = controller.router().sources_of(&fft_id).await.unwrap();
    assert!(sources.is_empty());
}

#[tokio::test]
async fn test_fft_pool_exhaustion() {
    let sim = sim().await;
    let mut controller = controller(&sim).await;
    let fft = controller.get_fft_channel().unwrap();
    assert!(matches!(
        controller.get_fft_channel(),
        Err(ControlError::PoolExhausted(_))
    ));
    controller.save_fft_channel(fft).await.unwrap();
    assert!(controller.get_fft_channel().is_ok());
}

// ============================================================================
// Error recovery
// ============================================================================

#[tokio::test]
async fn test_refused_command_then_valid_command() {
    let sim = sim().await;
    let controller = controller(&sim).await;

    let err = controller
        .console()
        .send_custom_command("WBDDC:1 NOPE? 1,2")
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::CommandFailure { .. }), "{err}");

    let reply = controller
        .console()
        .send_custom_command("RCV:1 FRQ?")
        .await
        .unwrap();
    assert!(reply.starts_with("RCV:1 FRQ"));
    assert!(controller.channel(0).unwrap().frequency().await.is_ok());
}
