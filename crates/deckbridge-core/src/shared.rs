use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use log::warn;

use crate::geometry::Grid;

/// Version string sent in the init acknowledgement. The plugin refuses to pair
/// with hosts older than this protocol revision.
pub const PROTOCOL_VERSION: &str = "1.4.2";

/// Filesystem locations used by the bridge.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub image_cache_dir: PathBuf,
}

impl Paths {
    /// Path of the placeholder icon shown on bound buttons while the plugin is
    /// away.
    pub fn placeholder_icon(&self) -> PathBuf {
        self.config_dir.join("placeholder.svg")
    }

    /// Path of the trampoline script wired into button commands. Invoked by
    /// the device layer on key-down with the pipe path and a serialized
    /// command payload.
    pub fn trampoline(&self) -> PathBuf {
        self.config_dir.join("pipe_writer.sh")
    }
}

pub fn discover_paths() -> anyhow::Result<Paths> {
    let base =
        BaseDirs::new().ok_or_else(|| anyhow::anyhow!("failed to determine base directories"))?;
    let config_dir = base.config_dir().join("deckbridge");
    let image_cache_dir = config_dir.join("image_cache");

    Ok(Paths {
        config_dir,
        image_cache_dir,
    })
}

/// Tunables for the bridge. Reference values match the deployment this was
/// written for; none of them are hard-coded elsewhere.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Key layout of the bound device.
    pub grid: Grid,
    /// Loopback port the plugin WebSocket server listens on.
    pub port: u16,
    /// Well-known path of the named pipe the trampoline writes to.
    pub pipe_path: PathBuf,
    /// Receive timeout driving the heartbeat/flush cadence of a plugin session.
    pub heartbeat_timeout: Duration,
    /// Delay between a plugin disconnect and the visual reset of bound buttons.
    pub grace_period: Duration,
    /// Per-read buffer size for the pipe listener.
    pub pipe_read_buffer: usize,
    /// Capacity of the outbound message queue.
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            grid: Grid::default(),
            port: 3001,
            pipe_path: PathBuf::from("/tmp/deckbridge_pipe"),
            heartbeat_timeout: Duration::from_secs(2),
            grace_period: Duration::from_secs(60),
            pipe_read_buffer: 1024,
            queue_capacity: 1024,
        }
    }
}

const PLACEHOLDER_SVG: &[u8] = include_bytes!("../assets/placeholder.svg");
const TRAMPOLINE_SH: &[u8] = include_bytes!("../assets/pipe_writer.sh");

fn ensure_file(path: &Path, bytes: &[u8]) {
    if path.is_file() {
        return;
    }
    if let Err(err) = std::fs::write(path, bytes) {
        warn!("Failed to write bundled asset {}: {}", path.display(), err);
    }
}

/// Install the bundled assets the bridge expects under the config directory.
///
/// User replacements are preserved; only missing files are written.
pub fn ensure_assets(paths: &Paths) -> anyhow::Result<()> {
    std::fs::create_dir_all(&paths.config_dir)?;
    std::fs::create_dir_all(&paths.image_cache_dir)?;

    ensure_file(&paths.placeholder_icon(), PLACEHOLDER_SVG);

    let trampoline = paths.trampoline();
    ensure_file(&trampoline, TRAMPOLINE_SH);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&trampoline, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}
