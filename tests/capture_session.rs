//! Capture session behaviour against the scripted device service.

use std::sync::Arc;
use std::time::Duration;

use fingerprint_demo_lib::{
    capture::{CaptureController, CaptureState},
    device::{event_channel, CallKind, DeviceApi, DeviceCall, DeviceEvent, DeviceScript, ScriptedDevice},
    models::{Quality, SampleFormat, SamplePayload},
    normalize::device::DEFAULT_KIND,
    settings::ClientSettings,
    utils::LogLevel,
    ClientError,
};
use serde_json::json;

fn setup(script: DeviceScript, settings: ClientSettings) -> (CaptureController, Arc<ScriptedDevice>) {
    let (tx, _rx) = event_channel();
    let device = Arc::new(ScriptedDevice::new(script, tx));
    let api: Arc<dyn DeviceApi> = device.clone();
    (CaptureController::new(Some(api), &settings), device)
}

fn subscribing_script() -> DeviceScript {
    DeviceScript {
        requires_subscription: true,
        ..DeviceScript::default()
    }
}

#[tokio::test]
async fn enumeration_normalizes_capitalized_device() {
    let script = DeviceScript {
        devices: vec![json!({"DeviceId": "A1", "Name": "Reader1"})],
        ..DeviceScript::default()
    };
    let (mut controller, _device) = setup(script, ClientSettings::default());

    let devices = controller.enumerate_devices().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "A1");
    assert_eq!(devices[0].name, "Reader1");
    assert_eq!(devices[0].kind, DEFAULT_KIND);
    assert!(devices[0].connected);
    assert!(controller.service_connected());
}

#[tokio::test]
async fn enumeration_merges_device_info_and_survives_info_failure() {
    let mut script = DeviceScript {
        devices: vec![json!({"deviceId": "A1"}), json!({"deviceId": "B2", "name": "Second"})],
        ..DeviceScript::default()
    };
    script
        .device_info
        .insert("A1".into(), json!({"name": "Merged", "firmwareVersion": "3.1"}));
    let (mut controller, device) = setup(script, ClientSettings::default());

    let devices = controller.enumerate_devices().await.unwrap();

    assert_eq!(devices[0].name, "Merged");
    assert_eq!(devices[0].details.firmware_version, "3.1");
    // No info scripted for B2: the lookup fails and the raw entry is kept.
    assert_eq!(devices[1].name, "Second");
    assert_eq!(
        device.calls(),
        vec![
            DeviceCall::Enumerate,
            DeviceCall::DeviceInfo("A1".into()),
            DeviceCall::DeviceInfo("B2".into()),
        ]
    );
    assert!(controller
        .activity_log()
        .entries()
        .any(|e| e.level == LogLevel::Warning && e.message.contains("B2")));
}

#[tokio::test]
async fn enumeration_failure_clears_devices() {
    let script = DeviceScript {
        devices: vec![json!({"id": "x"})],
        ..DeviceScript::default()
    };
    let (mut controller, device) = setup(script, ClientSettings::default());
    controller.enumerate_devices().await.unwrap();

    device.fail(CallKind::Enumerate);
    let err = controller.enumerate_devices().await.unwrap_err();

    assert!(matches!(err, ClientError::DeviceEnumerationFailed(_)));
    assert!(controller.devices().is_empty());
    assert!(!controller.service_connected());
}

#[tokio::test]
async fn start_without_api_fails_fast() {
    let mut controller = CaptureController::new(None, &ClientSettings::default());

    assert_eq!(
        controller.start(SampleFormat::PngImage).await,
        Err(ClientError::ApiUnavailable)
    );
    assert_eq!(controller.state(), CaptureState::Idle);
    assert_eq!(
        controller.enumerate_devices().await.unwrap_err(),
        ClientError::ApiUnavailable
    );
}

#[tokio::test]
async fn start_subscribes_then_starts() {
    let (mut controller, device) = setup(subscribing_script(), ClientSettings::default());

    controller.start(SampleFormat::Intermediate).await.unwrap();

    assert_eq!(controller.state(), CaptureState::Active);
    assert_eq!(controller.session().format, Some(SampleFormat::Intermediate));
    assert!(controller.session().session_id.is_some());
    assert_eq!(
        device.calls(),
        vec![
            DeviceCall::Subscribe,
            DeviceCall::StartAcquisition(SampleFormat::Intermediate)
        ]
    );
}

#[tokio::test]
async fn subscribe_failure_is_only_a_warning() {
    let (mut controller, device) = setup(subscribing_script(), ClientSettings::default());
    device.fail(CallKind::Subscribe);

    controller.start(SampleFormat::PngImage).await.unwrap();

    assert_eq!(controller.state(), CaptureState::Active);
    assert!(controller
        .activity_log()
        .entries()
        .any(|e| e.level == LogLevel::Warning && e.message.starts_with("Event subscription warning")));
}

#[tokio::test]
async fn second_start_is_rejected_without_side_effects() {
    let (mut controller, device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();
    controller
        .handle_event(DeviceEvent::SamplesAcquired(json!({"samples": ["AAAA"]})))
        .await
        .unwrap();
    let session_before = controller.session().clone();

    let err = controller.start(SampleFormat::Raw).await.unwrap_err();

    assert_eq!(err, ClientError::AlreadyCapturing);
    assert_eq!(controller.state(), CaptureState::Active);
    assert_eq!(controller.session().sample_count, session_before.sample_count);
    assert_eq!(controller.session().format, Some(SampleFormat::PngImage));
    assert_eq!(controller.session().session_id, session_before.session_id);
    assert_eq!(device.calls().len(), 1);
}

#[tokio::test]
async fn start_failure_returns_to_idle() {
    let (mut controller, device) = setup(DeviceScript::default(), ClientSettings::default());
    device.fail(CallKind::StartAcquisition);

    let err = controller.start(SampleFormat::PngImage).await.unwrap_err();

    assert!(matches!(err, ClientError::AcquisitionStartFailed(_)));
    assert_eq!(controller.state(), CaptureState::Idle);

    device.recover(CallKind::StartAcquisition);
    controller.start(SampleFormat::PngImage).await.unwrap();
    assert_eq!(controller.state(), CaptureState::Active);
}

#[tokio::test]
async fn stop_while_idle_is_a_no_op() {
    let (mut controller, device) = setup(subscribing_script(), ClientSettings::default());

    controller.stop().await.unwrap();

    assert_eq!(controller.state(), CaptureState::Idle);
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn stop_then_unsubscribe() {
    let (mut controller, device) = setup(subscribing_script(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();
    device.fail(CallKind::Unsubscribe);

    controller.stop().await.unwrap();

    assert_eq!(controller.state(), CaptureState::Idle);
    assert_eq!(
        &device.calls()[2..],
        &[DeviceCall::StopAcquisition, DeviceCall::Unsubscribe]
    );
}

#[tokio::test]
async fn stop_failure_forces_idle() {
    let (mut controller, device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();
    device.fail(CallKind::StopAcquisition);

    let err = controller.stop().await.unwrap_err();

    assert!(matches!(err, ClientError::AcquisitionStopFailed(_)));
    assert_eq!(controller.state(), CaptureState::Idle);
}

#[tokio::test]
async fn json_string_sample_is_accepted_with_quality() {
    let (mut controller, _device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();
    controller
        .handle_event(DeviceEvent::SamplesAcquired(json!({"samples": ["AAAA"]})))
        .await
        .unwrap();
    let previous_id = controller.history().latest().unwrap().sequence_id;

    controller
        .handle_event(DeviceEvent::SamplesAcquired(json!({
            "samples": "{\"Data\":\"abc\",\"Quality\":\"87\"}"
        })))
        .await
        .unwrap();

    let record = controller.history().latest().unwrap();
    assert_eq!(record.quality, Quality::Score(87));
    assert_eq!(record.sequence_id, previous_id + 1);
    assert_eq!(record.format, SampleFormat::PngImage);
    assert_eq!(record.reader, "Unknown Device");
    assert!(matches!(record.payload, SamplePayload::InlineImage(_)));
    assert_eq!(controller.session().sample_count, 2);
    assert_eq!(controller.session().last_quality, Quality::Score(87));
}

#[tokio::test]
async fn malformed_samples_are_rejected_without_counting() {
    let (mut controller, _device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();

    for payload in [json!({"samples": 42}), json!({"samples": "{broken"}), json!(null)] {
        let err = controller
            .handle_event(DeviceEvent::SamplesAcquired(payload))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidPayload(_)));
    }

    assert_eq!(controller.session().sample_count, 0);
    assert!(controller.history().is_empty());
    assert_eq!(controller.state(), CaptureState::Active);
}

#[tokio::test]
async fn samples_without_quality_stay_not_available() {
    let (mut controller, _device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();
    controller
        .handle_event(DeviceEvent::QualityReported(json!({"quality": 64})))
        .await
        .unwrap();

    controller
        .handle_event(DeviceEvent::SamplesAcquired(json!({"samples": [{"Data": "AAAA"}]})))
        .await
        .unwrap();

    assert_eq!(controller.history().latest().unwrap().quality, Quality::NotAvailable);
    assert_eq!(controller.session().last_quality, Quality::Score(64));
}

#[tokio::test]
async fn communication_failure_forces_idle_and_surfaces() {
    let (mut controller, _device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::PngImage).await.unwrap();

    let err = controller
        .handle_event(DeviceEvent::CommunicationFailed(json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::CommunicationFailed(_)));
    assert!(err.to_string().contains("reinstall or reconnect"));
    assert_eq!(controller.state(), CaptureState::Idle);
    assert!(!controller.service_connected());
}

#[tokio::test]
async fn device_connect_event_refreshes_device_list() {
    let script = DeviceScript {
        devices: vec![json!({"deviceId": "N1"})],
        ..DeviceScript::default()
    };
    let (mut controller, device) = setup(script, ClientSettings::default());

    controller
        .handle_event(DeviceEvent::DeviceConnected(json!({"deviceId": "N1"})))
        .await
        .unwrap();

    assert_eq!(controller.devices().len(), 1);
    assert_eq!(device.calls(), vec![DeviceCall::Enumerate]);
    assert!(controller
        .activity_log()
        .entries()
        .any(|e| e.message == "Device connected: N1"));
}

#[tokio::test]
async fn clear_keeps_sequence_ids_moving() {
    let (mut controller, _device) = setup(DeviceScript::default(), ClientSettings::default());
    controller.start(SampleFormat::Raw).await.unwrap();
    let event = DeviceEvent::SamplesAcquired(json!({"samples": [{"data": "AAAA", "quality": 10}]}));
    controller.handle_event(event.clone()).await.unwrap();

    controller.clear_samples();
    assert_eq!(controller.session().sample_count, 0);
    assert_eq!(controller.session().last_quality, Quality::NotAvailable);

    controller.handle_event(event).await.unwrap();
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.history().latest().unwrap().sequence_id, 2);
}

#[tokio::test]
async fn hung_start_times_out_when_configured() {
    let settings = ClientSettings {
        call_timeout_ms: Some(50),
        ..ClientSettings::default()
    };
    let (mut controller, device) = setup(DeviceScript::default(), settings);
    device.hang(CallKind::StartAcquisition);

    let err = tokio::time::timeout(Duration::from_secs(5), controller.start(SampleFormat::PngImage))
        .await
        .expect("configured timeout should fire first")
        .unwrap_err();

    assert!(matches!(err, ClientError::CommunicationFailed(_)));
    assert_eq!(controller.state(), CaptureState::Idle);
}

#[tokio::test]
async fn hung_start_without_timeout_stays_starting() {
    let (mut controller, device) = setup(DeviceScript::default(), ClientSettings::default());
    device.hang(CallKind::StartAcquisition);

    let mut rx = controller.subscribe();
    let pending = tokio::time::timeout(
        Duration::from_millis(100),
        controller.start(SampleFormat::PngImage),
    )
    .await;

    assert!(pending.is_err());
    assert_eq!(rx.borrow_and_update().session.state, CaptureState::Starting);
}

#[tokio::test]
async fn device_report_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, _device) = setup(DeviceScript::demo(), ClientSettings::default());
    controller.enumerate_devices().await.unwrap();

    let report = controller.device_report(0).await.unwrap();
    assert_eq!(report.descriptor.details.model, "Demo Optical Sensor");
    assert_eq!(report.descriptor.details.serial_number, "DEMO-0001");
    assert_eq!(report.supported_formats, SampleFormat::ALL.to_vec());

    assert_eq!(
        controller.device_report(5).await.unwrap_err(),
        ClientError::DeviceNotFound(5)
    );

    let path = controller.export_diagnostics(dir.path()).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["deviceInfo"]["descriptor"]["name"], "Demo Fingerprint Reader");
}
