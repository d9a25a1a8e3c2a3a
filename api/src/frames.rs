//! Video decoding and the sampled landmark extraction loop
//!
//! Videos are decoded by an `ffmpeg` child process streaming raw RGB frames
//! over stdout, so only one frame is held in memory at a time. Only sampled
//! frames reach the landmark extractor.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::DecodeConfig;
use crate::error::PipelineError;
use crate::models::FrameRecord;
use crate::sampling::sample_indices;
use crate::services::extractor::LandmarkExtractor;

const RGB_CHANNELS: usize = 3;

/// Bytes of decoder stderr kept for error messages
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;

/// One decoded RGB24 frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Sequential source of decoded frames
#[async_trait]
pub trait FrameSource: Send {
    /// Frame count reported by the container, used for index sampling.
    /// The stream may deliver fewer frames than this.
    fn total_frames(&self) -> usize;

    /// Next frame, or `None` once the stream is exhausted
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, PipelineError>;

    /// Advance past one frame without handing it out.
    /// Returns false once the stream is exhausted.
    async fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        Ok(self.next_frame().await?.is_some())
    }

    /// Release decoder resources. Safe to call more than once.
    async fn close(&mut self) {}
}

/// `ffmpeg`-backed frame source
pub struct FfmpegDecoder {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    total_frames: usize,
    width: u32,
    height: u32,
    position: usize,
    scratch: Vec<u8>,
}

impl FfmpegDecoder {
    /// Count the container's frames with ffprobe and start the decoder.
    pub async fn open(path: &Path, config: &DecodeConfig) -> Result<Self, PipelineError> {
        let total_frames = count_frames(path, &config.ffprobe_bin).await?;
        let input = path
            .to_str()
            .ok_or_else(|| PipelineError::VideoOpen(format!("non-UTF-8 path {:?}", path)))?;

        let mut child = Command::new(&config.ffmpeg_bin)
            .args(decode_args(input, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::VideoOpen(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::VideoOpen("ffmpeg stdout not captured".to_string()))?;
        // ffmpeg blocks once the stderr pipe fills, so it is drained from the start
        let stderr = child.stderr.take().map(drain_stderr);

        tracing::debug!(
            path = %path.display(),
            total_frames,
            pid = ?child.id(),
            "video decoder started"
        );

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            stderr,
            total_frames,
            width: config.width,
            height: config.height,
            position: 0,
            scratch: vec![0; frame_len(config.width, config.height)],
        })
    }

    /// Read exactly one frame into `scratch`. A short trailing read means
    /// the stream ended early, which is treated as exhaustion.
    async fn read_into_scratch(&mut self) -> Result<bool, PipelineError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };

        let filled = read_full(stdout, &mut self.scratch).await?;
        if filled < self.scratch.len() {
            if filled > 0 {
                tracing::warn!(
                    position = self.position,
                    bytes = filled,
                    "truncated trailing frame discarded"
                );
            }
            self.finish_stream().await?;
            return Ok(false);
        }

        self.position += 1;
        Ok(true)
    }

    /// Called at end of stream: a decoder that failed before producing any
    /// frame means the video could not be decoded at all.
    async fn finish_stream(&mut self) -> Result<(), PipelineError> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().await?;
        let stderr_task = self.stderr.take();
        if status.success() || self.position > 0 {
            return Ok(());
        }

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(PipelineError::Decode(format!(
            "ffmpeg exited with {}: {}",
            status,
            stderr.trim()
        )))
    }
}

#[async_trait]
impl FrameSource for FfmpegDecoder {
    fn total_frames(&self) -> usize {
        self.total_frames
    }

    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, PipelineError> {
        let index = self.position;
        if !self.read_into_scratch().await? {
            return Ok(None);
        }
        Ok(Some(VideoFrame {
            index,
            width: self.width,
            height: self.height,
            rgb: self.scratch.clone(),
        }))
    }

    async fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        self.read_into_scratch().await
    }

    async fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop ffmpeg decoder: {}", e);
            }
        }
        if let Some(task) = self.stderr.take() {
            task.abort();
        }
    }
}

/// Read stderr to EOF, keeping only the head of it
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                    captured.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_CHANNELS
}

/// Fill `buf` as far as the stream allows, returning the bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Arguments for decoding to scaled raw RGB24 on stdout. `passthrough` keeps
/// ffmpeg from duplicating or dropping frames, so stream positions line up
/// with the frame count from ffprobe.
fn decode_args(input: &str, config: &DecodeConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .into_iter()
        .map(String::from)
        .collect();
    args.extend([
        "-threads".to_string(),
        config.ffmpeg_threads.to_string(),
        "-i".to_string(),
        input.to_string(),
        "-an".to_string(),
        "-sn".to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", config.width, config.height),
        "-fps_mode".to_string(),
        "passthrough".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

/// Count video frames with ffprobe. Failure here means the file is not a
/// readable video.
async fn count_frames(path: &Path, ffprobe_bin: &str) -> Result<usize, PipelineError> {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .arg("-count_packets")
        .args(["-show_entries", "stream=nb_read_packets"])
        .args(["-of", "csv=p=0"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::VideoOpen(format!("failed to spawn ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::VideoOpen(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }

    parse_frame_count(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        PipelineError::VideoOpen("no video stream found".to_string())
    })
}

/// Parse `nb_read_packets` from ffprobe csv output, e.g. `"120\n"` or `"120,\n"`.
fn parse_frame_count(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

/// Single pass over `source`: sample indices from its frame count, run the
/// extractor on selected frames only, and emit at most `target_count`
/// records with sequential ids. An early end of stream is not an error.
pub async fn extract_frame_records<S, E>(
    source: &mut S,
    extractor: &E,
    target_count: usize,
) -> Result<Vec<FrameRecord>, PipelineError>
where
    S: FrameSource + ?Sized,
    E: LandmarkExtractor + ?Sized,
{
    let indices = sample_indices(source.total_frames(), target_count);
    let Some(&last_selected) = indices.last() else {
        return Ok(Vec::new());
    };
    let selected: HashSet<usize> = indices.into_iter().collect();

    let mut records = Vec::with_capacity(target_count);
    let mut position = 0usize;

    while records.len() < target_count && position <= last_selected {
        if selected.contains(&position) {
            let Some(frame) = source.next_frame().await? else {
                break;
            };
            let landmarks = extractor.extract(&frame).await?;
            records.push(FrameRecord::from_landmarks(records.len() as u32, landmarks));
        } else if !source.skip_frame().await? {
            break;
        }
        position += 1;
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ExtractorError;
    use crate::models::{FrameLandmarks, LandmarkPoint, PosePoint};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory video whose container may claim more frames than it holds
    pub(crate) struct SyntheticVideo {
        pub reported: usize,
        pub actual: usize,
        pub position: usize,
        pub closed: bool,
    }

    impl SyntheticVideo {
        pub fn new(frames: usize) -> Self {
            Self {
                reported: frames,
                actual: frames,
                position: 0,
                closed: false,
            }
        }
    }

    #[async_trait]
    impl FrameSource for SyntheticVideo {
        fn total_frames(&self) -> usize {
            self.reported
        }

        async fn next_frame(&mut self) -> Result<Option<VideoFrame>, PipelineError> {
            if self.position >= self.actual {
                return Ok(None);
            }
            let index = self.position;
            self.position += 1;
            Ok(Some(VideoFrame {
                index,
                width: 2,
                height: 2,
                rgb: vec![index as u8; 12],
            }))
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Records which frames it saw; returns one point per group, or nothing
    pub(crate) struct RecordingExtractor {
        pub seen: Mutex<Vec<usize>>,
        pub detect: bool,
    }

    impl RecordingExtractor {
        pub fn new(detect: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                detect,
            }
        }

        pub fn seen(&self) -> Vec<usize> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LandmarkExtractor for RecordingExtractor {
        async fn extract(&self, frame: &VideoFrame) -> Result<FrameLandmarks, ExtractorError> {
            self.seen.lock().unwrap().push(frame.index);
            if !self.detect {
                return Ok(FrameLandmarks::default());
            }
            Ok(FrameLandmarks {
                face: Some(vec![LandmarkPoint::new(0.5, 0.5, 0.0)]),
                pose: Some(vec![PosePoint::new(0.5, 0.4, -0.2, 0.99)]),
                left_hand: Some(vec![LandmarkPoint::new(0.3, 0.6, 0.0)]),
                right_hand: Some(vec![LandmarkPoint::new(0.7, 0.6, 0.0)]),
            })
        }
    }

    pub(crate) struct FailingExtractor;

    #[async_trait]
    impl LandmarkExtractor for FailingExtractor {
        async fn extract(&self, _frame: &VideoFrame) -> Result<FrameLandmarks, ExtractorError> {
            Err(ExtractorError::Encode("boom".to_string()))
        }
    }

    /// Shell stand-ins for ffprobe and ffmpeg decoding 2x2 frames (12 bytes each)
    pub(crate) struct FakeTools {
        dir: PathBuf,
        pub config: DecodeConfig,
    }

    impl FakeTools {
        #[cfg(unix)]
        pub fn new(ffprobe: &str, ffmpeg: &str) -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = std::env::temp_dir().join(format!("sign_tools_{}", rand::random::<u64>()));
            std::fs::create_dir_all(&dir).unwrap();
            let write = |name: &str, body: &str| {
                let path = dir.join(name);
                std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
                path.to_string_lossy().into_owned()
            };
            let config = DecodeConfig {
                width: 2,
                height: 2,
                ffprobe_bin: write("ffprobe", ffprobe),
                ffmpeg_bin: write("ffmpeg", ffmpeg),
                ..DecodeConfig::default()
            };
            Self { dir, config }
        }
    }

    impl Drop for FakeTools {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn drain(decoder: &mut FfmpegDecoder) -> Result<usize, PipelineError> {
        let mut frames = 0;
        while let Some(frame) = decoder.next_frame().await? {
            assert_eq!(frame.index, frames);
            assert_eq!(frame.rgb.len(), 12);
            frames += 1;
        }
        Ok(frames)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_survives_noisy_stderr() {
        let tools = FakeTools::new(
            "echo 3",
            "head -c 240000 /dev/zero >&2\nhead -c 36 /dev/zero",
        );
        let mut decoder = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config)
            .await
            .unwrap();
        assert_eq!(decoder.total_frames(), 3);

        let frames = tokio::time::timeout(Duration::from_secs(5), drain(&mut decoder))
            .await
            .expect("decoder stalled on a full stderr pipe")
            .unwrap();
        assert_eq!(frames, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_failing_before_first_frame() {
        let tools = FakeTools::new("echo 10", "echo 'moov atom not found' >&2\nexit 1");
        let mut decoder = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config)
            .await
            .unwrap();

        match decoder.next_frame().await {
            Err(PipelineError::Decode(message)) => assert!(message.contains("moov atom not found")),
            other => panic!("expected decode error, got {:?}", other.map(|f| f.is_some())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_drops_truncated_frame() {
        let tools = FakeTools::new("echo 3", "head -c 30 /dev/zero");
        let mut decoder = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config)
            .await
            .unwrap();

        assert_eq!(drain(&mut decoder).await.unwrap(), 2);
        assert!(decoder.next_frame().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_failing_after_frames_is_exhaustion() {
        let tools = FakeTools::new("echo 5", "head -c 24 /dev/zero\necho 'corrupt packet' >&2\nexit 1");
        let mut decoder = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config)
            .await
            .unwrap();

        assert_eq!(drain(&mut decoder).await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_stops_running_decoder() {
        let tools = FakeTools::new("echo 100", "head -c 12 /dev/zero\nexec sleep 30");
        let mut decoder = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config)
            .await
            .unwrap();
        assert!(decoder.next_frame().await.unwrap().is_some());

        tokio::time::timeout(Duration::from_secs(5), decoder.close())
            .await
            .expect("close did not stop the decoder");
        assert!(decoder.next_frame().await.unwrap().is_none());
        decoder.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_container_is_open_error() {
        let tools = FakeTools::new("echo 'Invalid data found' >&2\nexit 1", "exit 0");
        let result = FfmpegDecoder::open(Path::new("/tmp/clip.mp4"), &tools.config).await;
        match result {
            Err(PipelineError::VideoOpen(message)) => assert!(message.contains("Invalid data found")),
            _ => panic!("expected open error"),
        }
    }

    #[tokio::test]
    async fn test_extracts_only_sampled_frames() {
        let mut video = SyntheticVideo::new(100);
        let extractor = RecordingExtractor::new(true);

        let records = extract_frame_records(&mut video, &extractor, 30).await.unwrap();

        assert_eq!(records.len(), 30);
        assert_eq!(extractor.seen(), sample_indices(100, 30));
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.frame_id, i as u32);
            assert!(!r.is_empty());
        }
        // stops decoding after the last sampled index
        assert_eq!(video.position, 97);
    }

    #[tokio::test]
    async fn test_short_video_yields_every_frame() {
        let mut video = SyntheticVideo::new(10);
        let extractor = RecordingExtractor::new(false);

        let records = extract_frame_records(&mut video, &extractor, 30).await.unwrap();

        assert_eq!(records.len(), 10);
        assert_eq!(extractor.seen(), (0..10).collect::<Vec<_>>());
        assert!(records.iter().all(FrameRecord::is_empty));
    }

    #[tokio::test]
    async fn test_stream_ending_early_is_not_an_error() {
        let mut video = SyntheticVideo {
            reported: 90,
            actual: 40,
            position: 0,
            closed: false,
        };
        let extractor = RecordingExtractor::new(true);

        let records = extract_frame_records(&mut video, &extractor, 30).await.unwrap();

        // indices are multiples of 3 below 40
        assert_eq!(records.len(), 14);
        assert_eq!(records.last().unwrap().frame_id, 13);
    }

    #[tokio::test]
    async fn test_empty_video() {
        let mut video = SyntheticVideo::new(0);
        let extractor = RecordingExtractor::new(true);
        let records = extract_frame_records(&mut video, &extractor, 30).await.unwrap();
        assert!(records.is_empty());
        assert!(extractor.seen().is_empty());
    }

    #[tokio::test]
    async fn test_extractor_failure_propagates() {
        let mut video = SyntheticVideo::new(50);
        let err = extract_frame_records(&mut video, &FailingExtractor, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn test_parse_frame_count() {
        assert_eq!(parse_frame_count("120\n"), Some(120));
        assert_eq!(parse_frame_count("  87,\n"), Some(87));
        assert_eq!(parse_frame_count("\n\n45\n"), Some(45));
        assert_eq!(parse_frame_count("N/A\n"), None);
        assert_eq!(parse_frame_count(""), None);
    }

    #[test]
    fn test_decode_args() {
        let config = DecodeConfig {
            width: 640,
            height: 480,
            ffmpeg_threads: 2,
            ..DecodeConfig::default()
        };
        let args = decode_args("/tmp/in.mp4", &config);
        let joined = args.join(" ");
        assert!(joined.contains("-threads 2"));
        assert!(joined.contains("-i /tmp/in.mp4"));
        assert!(joined.contains("-vf scale=640:480"));
        assert!(joined.contains("-pix_fmt rgb24 -f rawvideo"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn test_read_full_reports_short_reads() {
        let data = vec![7u8; 10];
        let mut reader = data.as_slice();
        let mut buf = vec![0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(1024, 1024), 1024 * 1024 * 3);
    }
}
