//! Shared test utilities for CSI driver tests.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use zram::ZramControl;

use crate::controller::ControllerService;
use crate::csi;
use crate::driver::{Config, DriverState, VolumeLocks};
use crate::identity::IdentityService;
use crate::mount::fake::FakeMounter;
use crate::node::NodeService;

const DEVICE_ATTRIBUTES: [&str; 5] = [
    "reset",
    "disksize",
    "mem_limit",
    "max_comp_streams",
    "comp_algorithm",
];

/// Lay out a sysfs/dev tree whose next hot-added device is `zram<next_id>`.
pub fn fake_sysfs(next_id: u32) -> (TempDir, ZramControl) {
    let dir = TempDir::new().expect("failed to create temp dir");
    write_sysfs(&dir, next_id);
    let control = ZramControl::new(dir.path().join("sys"), dir.path().join("dev"));
    (dir, control)
}

fn write_sysfs(dir: &TempDir, next_id: u32) {
    let control_dir = dir.path().join("sys/class/zram-control");
    fs::create_dir_all(&control_dir).unwrap();
    fs::write(control_dir.join("hot_add"), format!("{next_id}\n")).unwrap();
    fs::write(control_dir.join("hot_remove"), "").unwrap();

    let block_dir = dir.path().join(format!("sys/block/zram{next_id}"));
    fs::create_dir_all(&block_dir).unwrap();
    for attr in DEVICE_ATTRIBUTES {
        fs::write(block_dir.join(attr), "").unwrap();
    }
    fs::create_dir_all(dir.path().join("dev")).unwrap();
}

pub fn mount_capability() -> csi::VolumeCapability {
    csi::VolumeCapability {
        access_type: Some(csi::volume_capability::AccessType::Mount(
            csi::volume_capability::MountVolume {
                fs_type: "ext4".to_string(),
                mount_flags: vec![],
                volume_mount_group: String::new(),
            },
        )),
        access_mode: Some(csi::volume_capability::AccessMode {
            mode: csi::volume_capability::access_mode::Mode::SingleNodeMultiWriter as i32,
        }),
    }
}

pub fn block_capability() -> csi::VolumeCapability {
    csi::VolumeCapability {
        access_type: Some(csi::volume_capability::AccessType::Block(
            csi::volume_capability::BlockVolume {},
        )),
        access_mode: Some(csi::volume_capability::AccessMode {
            mode: csi::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
        }),
    }
}

/// Test fixture providing isolated driver state for each test.
///
/// The state runs against an in-memory mount driver and a fake sysfs tree
/// that hands out `zram0`.
pub struct TestFixture {
    pub state: Arc<DriverState>,
    pub mounter: Arc<FakeMounter>,
    pub locks: Arc<VolumeLocks>,
    dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        write_sysfs(&dir, 0);

        let mut config = Config {
            node_id: "test-node".to_string(),
            endpoint: "unix:///tmp/test.sock".to_string(),
            sysfs_root: dir.path().join("sys"),
            dev_root: dir.path().join("dev"),
            ..Default::default()
        };
        configure(&mut config);

        let mounter = Arc::new(FakeMounter::default());
        let locks = Arc::new(VolumeLocks::new());
        let state = Arc::new(DriverState::with_parts(
            config,
            mounter.clone(),
            locks.clone(),
        ));
        Self {
            state,
            mounter,
            locks,
            dir,
        }
    }

    /// Path inside the fixture's temp dir.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn sys_dir(&self, id: u32) -> PathBuf {
        self.path(&format!("sys/block/zram{id}"))
    }

    pub fn sys_attr(&self, id: u32, name: &str) -> String {
        fs::read_to_string(self.sys_dir(id).join(name)).unwrap()
    }

    pub fn dev_path(&self, id: u32) -> String {
        self.path(&format!("dev/zram{id}")).display().to_string()
    }

    /// Contents of the hot_remove control file.
    pub fn hot_remove(&self) -> String {
        fs::read_to_string(self.path("sys/class/zram-control/hot_remove")).unwrap()
    }

    pub fn identity_service(&self) -> IdentityService {
        IdentityService::new(Arc::clone(&self.state))
    }

    pub fn controller_service(&self) -> ControllerService {
        ControllerService::new(Arc::clone(&self.state))
    }

    pub fn node_service(&self) -> NodeService {
        NodeService::new(Arc::clone(&self.state))
    }
}
