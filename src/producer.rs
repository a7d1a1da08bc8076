//! Stand-in encoder: replays an H.264 elementary stream from disk.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use webrtc::media::io::h264_reader::H264Reader;

const READER_CAPACITY: usize = 1_048_576;

/// Hand every NAL unit of the Annex-B file at `path` to `sink`, `fps` units
/// per second, looping at end of file until `terminate` is set.
pub fn spawn_file_source<F>(
    path: PathBuf,
    fps: u32,
    terminate: Arc<AtomicBool>,
    mut sink: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let interval = Duration::from_secs(1) / fps.max(1);
    let handle = thread::Builder::new()
        .name("source".into())
        .spawn(move || {
            log::info!("Streaming {} at {} fps", path.display(), fps);
            if let Err(e) = stream_file(&path, interval, &terminate, &mut sink) {
                log::error!("Media source stopped: {:#}", e);
            }
        })
        .context("failed to spawn media source thread")?;
    Ok(handle)
}

fn stream_file<F>(path: &Path, interval: Duration, terminate: &AtomicBool, sink: &mut F) -> Result<()>
where
    F: FnMut(&[u8]),
{
    while !terminate.load(Ordering::Acquire) {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let mut reader = H264Reader::new(BufReader::new(file), READER_CAPACITY);

        let mut units = 0usize;
        while !terminate.load(Ordering::Acquire) {
            // end of stream surfaces as an error
            let Ok(nal) = reader.next_nal() else {
                break;
            };
            sink(&nal.data);
            units += 1;
            thread::sleep(interval);
        }

        if units == 0 {
            bail!("{} holds no H.264 NAL units", path.display());
        }
        log::debug!("Rewinding {} after {} NAL units", path.display(), units);
    }
    Ok(())
}
