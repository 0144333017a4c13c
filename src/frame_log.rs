// Frame timing - rolling FPS and the per-frame CSV log

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

const FPS_SAMPLES: usize = 10;

/// Average FPS over the last ten frames
#[derive(Debug)]
pub struct FpsCounter {
    samples: [f32; FPS_SAMPLES],
    frames: usize,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self {
            samples: [0.0; FPS_SAMPLES],
            frames: 0,
        }
    }
}

impl FpsCounter {
    /// Record one frame time in seconds and return the current average FPS
    pub fn push(&mut self, frame_time: f32) -> f32 {
        self.samples[self.frames % FPS_SAMPLES] = frame_time;
        self.frames += 1;
        self.fps()
    }

    pub fn fps(&self) -> f32 {
        let count = self.frames.min(FPS_SAMPLES);
        if count == 0 {
            return 0.0;
        }
        let average = self.samples[..count].iter().sum::<f32>() / count as f32;
        if average > 0.0 {
            1.0 / average
        } else {
            0.0
        }
    }
}

/// Measures wall time between frames
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Seconds since the previous tick
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        elapsed
    }

    /// Forget the time since the last tick
    pub fn restart(&mut self) {
        self.last = Instant::now();
    }
}

/// Clock, FPS window and optional CSV log, sampled once per loop iteration
pub struct FrameTimer<W: Write> {
    clock: FrameClock,
    fps: FpsCounter,
    log: Option<FrameLog<W>>,
}

impl<W: Write> FrameTimer<W> {
    pub fn new(log: Option<FrameLog<W>>) -> Self {
        Self {
            clock: FrameClock::new(),
            fps: FpsCounter::default(),
            log,
        }
    }

    /// Tick the clock and log the sample. Returns the frame time in seconds
    /// and the rolling FPS.
    pub fn sample(&mut self) -> Result<(f32, f32)> {
        let frame_time = self.clock.tick();
        let fps = self.fps.push(frame_time);
        if let Some(log) = self.log.as_mut() {
            log.record(frame_time, fps)?;
        }
        Ok((frame_time, fps))
    }

    /// Called when drawing resumes after a pause, e.g. a minimize
    pub fn restart(&mut self) {
        self.clock.restart();
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.log.as_mut() {
            Some(log) => log.flush(),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn into_log(self) -> Option<FrameLog<W>> {
        self.log
    }
}

/// One CSV row per frame. The file is truncated when opened.
pub struct FrameLog<W: Write> {
    out: W,
    frame: u64,
}

impl FrameLog<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create frame log {:?}", path))?;
        log::info!("Logging frame times to {:?}", path);
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> FrameLog<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "frame,frame_time_ms,fps").context("Failed to write frame log header")?;
        Ok(Self { out, frame: 0 })
    }

    pub fn record(&mut self, frame_time: f32, fps: f32) -> Result<()> {
        writeln!(
            self.out,
            "{},{:.3},{:.1}",
            self.frame,
            frame_time * 1000.0,
            fps
        )
        .context("Failed to write frame log")?;
        self.frame += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush frame log")
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_only_recorded_frames_at_first() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.fps(), 0.0);
        assert_eq!(fps.push(0.5), 2.0);
        assert_eq!(fps.push(0.25), 1.0 / 0.375);
    }

    #[test]
    fn window_rolls_over_after_ten_samples() {
        let mut fps = FpsCounter::default();
        for _ in 0..FPS_SAMPLES {
            fps.push(1.0);
        }
        assert_eq!(fps.fps(), 1.0);

        // Ten fast frames push every slow one out
        let mut last = 0.0;
        for _ in 0..FPS_SAMPLES {
            last = fps.push(0.01);
        }
        assert!((last - 100.0).abs() < 1e-3);
    }

    #[test]
    fn zero_frame_times_do_not_divide_by_zero() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.push(0.0), 0.0);
    }

    #[test]
    fn csv_has_header_and_one_row_per_frame() {
        let mut log = FrameLog::new(Vec::new()).unwrap();
        log.record(0.016, 62.5).unwrap();
        log.record(0.020, 55.0).unwrap();

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["frame,frame_time_ms,fps", "0,16.000,62.5", "1,20.000,55.0"]);
    }

    #[test]
    fn every_sample_gets_a_row() {
        let mut timer = FrameTimer::new(Some(FrameLog::new(Vec::new()).unwrap()));
        for _ in 0..3 {
            timer.sample().unwrap();
        }

        let out = timer.into_log().unwrap().into_inner();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().nth(3).unwrap().starts_with("2,"));
    }

    #[test]
    fn restart_drops_the_paused_time() {
        let mut timer: FrameTimer<Vec<u8>> = FrameTimer::new(None);
        timer.clock.last = Instant::now() - std::time::Duration::from_secs(5);

        timer.restart();
        let (frame_time, _) = timer.sample().unwrap();

        assert!(frame_time < 1.0, "paused time leaked: {}", frame_time);
    }

    #[test]
    fn log_file_is_truncated_on_open() {
        let path = std::env::temp_dir().join(format!("skyview-frames-{}.csv", std::process::id()));
        std::fs::write(&path, "stale contents from an earlier run\n".repeat(10)).unwrap();

        let log = FrameLog::create(&path).unwrap();
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "frame,frame_time_ms,fps\n");
        let _ = std::fs::remove_file(&path);
    }
}
