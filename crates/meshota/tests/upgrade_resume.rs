// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! Upgrade sessions surviving a reset.
//!
//! A reset is simulated by dropping the controller, rebooting the flash and
//! building a new controller over the same store.

use std::sync::Arc;

use parking_lot::Mutex;

use meshota::event::{Event, EventQueue};
use meshota::platform::{
    FileStore, KvStore, MemoryFlash, MemoryStore, MeshRole, PartitionId, StaticMesh,
};
use meshota::transport::MacAddr;
use meshota::upgrade::{DataPacket, FirmwareSource, Platform, UpgradeController, UpgradeState};
use meshota::{Error, Result, StatusCode, TransferStatus, UpgradeConfig, UpgradeLink};

const ROOT: MacAddr = [0x30, 0xae, 0xa4, 0x00, 0x00, 0x01];

#[derive(Default)]
struct RecordingLink {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingLink {
    fn last_status(&self) -> TransferStatus {
        let sent = self.sent.lock();
        TransferStatus::decode(sent.last().expect("a reply")).expect("status")
    }
}

impl UpgradeLink for RecordingLink {
    fn send_upgrade(&self, _dest: &MacAddr, message: &[u8]) -> Result<()> {
        self.sent.lock().push(message.to_vec());
        Ok(())
    }
}

struct Device {
    flash: Arc<MemoryFlash>,
    kv: Arc<dyn KvStore>,
    mesh: Arc<StaticMesh>,
    link: Arc<RecordingLink>,
    events: Arc<EventQueue>,
    config: UpgradeConfig,
}

impl Device {
    fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            flash: Arc::new(MemoryFlash::new(8 * 1024)),
            kv,
            mesh: Arc::new(StaticMesh::new(MeshRole::Leaf, 10)),
            link: Arc::new(RecordingLink::default()),
            events: Arc::new(EventQueue::new()),
            config: UpgradeConfig {
                chunk_size: 200,
                max_chunks: 32,
                report_interval: 30,
                ..UpgradeConfig::default()
            },
        }
    }

    /// Fresh controller, as after power-up.
    fn boot(&self) -> UpgradeController {
        UpgradeController::new(
            self.config.clone(),
            Platform {
                storage: self.flash.clone(),
                kv: self.kv.clone(),
                mesh: self.mesh.clone(),
                link: self.link.clone(),
                events: self.events.clone(),
            },
        )
    }

    fn reset(&self, controller: UpgradeController) -> UpgradeController {
        drop(controller);
        self.flash.reboot();
        self.boot()
    }
}

fn source(config: &UpgradeConfig) -> FirmwareSource {
    let image = (0..2_000).map(|i| (i % 241) as u8).collect();
    FirmwareSource::new("sensor_v5.bin", image, config).expect("source")
}

fn deliver(controller: &mut UpgradeController, source: &FirmwareSource, seqs: &[u16]) {
    for &seq in seqs {
        let packet = source.packet(seq).expect("packet");
        controller.on_data(&ROOT, &packet).expect("chunk");
    }
}

#[test]
fn test_resume_from_last_saved_progress() {
    let device = Device::new(Arc::new(MemoryStore::new()));
    let source = source(&device.config);

    let mut controller = device.boot();
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("announce");
    // 50% written, progress saved at 30%.
    deliver(&mut controller, &source, &[0, 1, 2, 3, 4]);

    let mut controller = device.reset(controller);
    assert_eq!(controller.state(), UpgradeState::Idle);

    controller
        .on_status(&ROOT, &source.announcement())
        .expect("re-announce");
    let report = device.link.last_status();
    assert_eq!(report.written_size, 600);
    assert_eq!(source.missing_chunks(&report), (3..10).collect::<Vec<u16>>());

    let missing = source.missing_chunks(&report);
    deliver(&mut controller, &source, &missing);

    assert_eq!(controller.state(), UpgradeState::Finished);
    assert_eq!(device.flash.erases(), 1);
    assert_eq!(device.flash.boot_selections(), 1);
    assert_eq!(device.flash.boot_target(), PartitionId(1));
    assert!(device.kv.load("upgrade_session").expect("load").is_none());

    let image = device.flash.image(PartitionId(1)).expect("partition");
    for seq in 0..10u16 {
        let packet = source.packet(seq).expect("packet");
        let start = usize::from(seq) * 200;
        assert_eq!(&image[start..start + packet.data.len()], &packet.data[..]);
    }
}

#[test]
fn test_data_after_reset_restores_session() {
    let device = Device::new(Arc::new(MemoryStore::new()));
    let source = source(&device.config);

    let mut controller = device.boot();
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("announce");
    deliver(&mut controller, &source, &[0, 1, 2]);

    let mut controller = device.reset(controller);
    deliver(&mut controller, &source, &[3]);

    let status = controller.status().expect("status");
    assert_eq!(status.name, "sensor_v5.bin");
    assert_eq!(status.written_size, 800);
    assert_eq!(controller.state(), UpgradeState::Active);
}

#[test]
fn test_resume_with_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let device = Device::new(Arc::new(FileStore::open(dir.path()).expect("store")));
    let source = source(&device.config);

    let mut controller = device.boot();
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("announce");
    deliver(&mut controller, &source, &[0, 1, 2]);
    assert!(dir.path().join("upgrade_session").exists());

    let mut controller = device.reset(controller);
    let restored = Arc::new(FileStore::open(dir.path()).expect("reopen"));
    assert!(restored.load("upgrade_session").expect("load").is_some());

    controller
        .on_status(&ROOT, &source.announcement())
        .expect("re-announce");
    let missing = source.missing_chunks(&device.link.last_status());
    deliver(&mut controller, &source, &missing);

    assert!(controller.is_finished());
    assert!(!dir.path().join("upgrade_session").exists());
}

#[test]
fn test_finished_image_is_not_applied_twice() {
    let device = Device::new(Arc::new(MemoryStore::new()));
    let source = source(&device.config);

    let mut controller = device.boot();
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("announce");
    deliver(&mut controller, &source, &(0..10).collect::<Vec<u16>>());
    assert_eq!(device.flash.boot_selections(), 1);

    // Re-announcing and replaying chunks changes nothing.
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("re-announce");
    deliver(&mut controller, &source, &[9]);
    assert_eq!(device.flash.boot_selections(), 1);
    assert_eq!(device.flash.erases(), 1);

    let events = device.events.drain();
    assert_eq!(
        events.iter().filter(|e| **e == Event::UpgradeFinished).count(),
        1
    );
    assert!(events.contains(&Event::UpgradeProgress(100)));
    assert_eq!(device.link.last_status().written_size, 2_000);
}

#[test]
fn test_stop_then_data_is_not_initialized() {
    let device = Device::new(Arc::new(MemoryStore::new()));
    let source = source(&device.config);

    let mut controller = device.boot();
    controller
        .on_status(&ROOT, &source.announcement())
        .expect("announce");
    deliver(&mut controller, &source, &[0, 1, 2]);

    controller.stop().expect("stop");
    let reply = device.link.last_status();
    assert_eq!(reply.error_code, StatusCode::Stopped);
    assert_eq!(reply.written_size, 0);

    let packet = DataPacket::new(3, &[0u8; 200]).expect("packet");
    assert!(matches!(
        controller.on_data(&ROOT, &packet),
        Err(Error::NotInitialized)
    ));

    // Nothing survives a reset either.
    let mut controller = device.reset(controller);
    assert!(matches!(
        controller.on_data(&ROOT, &packet),
        Err(Error::NotInitialized)
    ));
}

#[test]
fn test_corrupt_record_is_discarded() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    kv.save("upgrade_session", b"garbage").expect("save");
    let device = Device::new(kv);

    let mut controller = device.boot();
    let packet = DataPacket::new(0, &[0u8; 200]).expect("packet");
    assert!(matches!(
        controller.on_data(&ROOT, &packet),
        Err(Error::NotInitialized)
    ));
    assert!(device.kv.load("upgrade_session").expect("load").is_none());
}
