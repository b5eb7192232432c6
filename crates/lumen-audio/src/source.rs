//! Loopback capture of the default playback device.
//!
//! cpal streams are not `Send` on every host, so the stream lives on a
//! dedicated thread and the rest of the program talks to it over channels.
//! On Windows the render endpoint itself is captured; elsewhere capture
//! reads the sound server's monitor source for that endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Host, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureBuffer, FRAME_BYTES};
use crate::error::{AudioError, AudioResult};

/// How often the runtime thread checks whether the default device moved.
const DEVICE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// How long callers wait for the runtime thread to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A playback endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    pub name: String,
}

/// Native format of a running capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Something that can capture what the default playback device plays.
///
/// Having no default playback device is not an error: lookups return
/// `None` and capture does not start.
pub trait AudioSource: Send {
    /// Get the current default playback device.
    ///
    /// # Errors
    /// Returns an error if the audio host cannot be queried.
    fn default_output(&mut self) -> AudioResult<Option<OutputDevice>>;

    /// (Re)start loopback capture of the default playback device into `buffer`.
    ///
    /// # Errors
    /// Returns an error if the device is present but its stream cannot be opened.
    fn start_capture(&mut self, buffer: Arc<CaptureBuffer>) -> AudioResult<Option<CaptureFormat>>;

    /// Stop capturing. Does nothing if no capture is running.
    ///
    /// Once this returns the capture callback no longer writes to the buffer.
    fn stop_capture(&mut self);

    /// Whether the default playback device changed since the last call.
    fn default_changed(&mut self) -> bool;
}

enum Command {
    DefaultOutput(std_mpsc::Sender<AudioResult<Option<OutputDevice>>>),
    Start(Arc<CaptureBuffer>, std_mpsc::Sender<AudioResult<Option<CaptureFormat>>>),
    Stop(std_mpsc::Sender<()>),
    Shutdown,
}

/// Loopback capture through cpal, run on its own thread.
pub struct CpalLoopback {
    commands: std_mpsc::Sender<Command>,
    changed: Arc<AtomicBool>,
}

impl CpalLoopback {
    /// Spawn the capture thread.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn() -> AudioResult<Self> {
        let (commands, command_rx) = std_mpsc::channel();
        let changed = Arc::new(AtomicBool::new(false));

        let thread_changed = Arc::clone(&changed);
        std::thread::Builder::new()
            .name("lumen-loopback".to_string())
            .spawn(move || run_loopback_thread(&command_rx, &thread_changed))
            .map_err(|e| AudioError::Runtime(format!("Failed to spawn loopback thread: {e}")))?;

        Ok(Self { commands, changed })
    }

    fn call<T>(&self, command: impl FnOnce(std_mpsc::Sender<T>) -> Command) -> AudioResult<T> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| AudioError::Runtime("Loopback thread is gone".to_string()))?;

        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| AudioError::Runtime("Timeout waiting for loopback thread".to_string()))
    }
}

impl AudioSource for CpalLoopback {
    fn default_output(&mut self) -> AudioResult<Option<OutputDevice>> {
        self.call(Command::DefaultOutput)?
    }

    fn start_capture(&mut self, buffer: Arc<CaptureBuffer>) -> AudioResult<Option<CaptureFormat>> {
        self.changed.store(false, Ordering::Release);
        self.call(|reply| Command::Start(buffer, reply))?
    }

    fn stop_capture(&mut self) {
        if let Err(e) = self.call(Command::Stop) {
            warn!(error = %e, "Failed to stop loopback capture");
        }
    }

    fn default_changed(&mut self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

impl Drop for CpalLoopback {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// A stream and the playback device it mirrors.
struct Capture {
    _stream: Stream,
    output: String,
}

fn run_loopback_thread(commands: &std_mpsc::Receiver<Command>, changed: &AtomicBool) {
    let host = cpal::default_host();
    info!(host = ?host.id(), "Loopback runtime started");
    let mut capture: Option<Capture> = None;

    loop {
        match commands.recv_timeout(DEVICE_CHECK_INTERVAL) {
            Ok(Command::DefaultOutput(reply)) => {
                let _ = reply.send(default_output(&host));
            }
            Ok(Command::Start(buffer, reply)) => {
                capture = None;
                let result = open_capture(&host, buffer).map(|opened| {
                    opened.map(|(next, format)| {
                        capture = Some(next);
                        format
                    })
                });
                if let Err(e) = &result {
                    error!(error = %e, "Failed to start loopback capture");
                }
                let _ = reply.send(result);
            }
            Ok(Command::Stop(reply)) => {
                if capture.take().is_some() {
                    info!("Loopback capture stopped");
                }
                let _ = reply.send(());
            }
            Ok(Command::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if let Some(active) = &capture {
                    let current = default_output(&host).ok().flatten();
                    if current.as_ref().is_none_or(|d| d.name != active.output) {
                        debug!(from = %active.output, to = ?current, "Default output changed");
                        changed.store(true, Ordering::Release);
                    }
                }
            }
        }
    }

    info!("Loopback runtime stopped");
}

fn default_output(host: &Host) -> AudioResult<Option<OutputDevice>> {
    let Some(device) = host.default_output_device() else {
        return Ok(None);
    };
    Ok(Some(OutputDevice { name: device.name()? }))
}

fn open_capture(
    host: &Host,
    buffer: Arc<CaptureBuffer>,
) -> AudioResult<Option<(Capture, CaptureFormat)>> {
    let Some(output) = host.default_output_device() else {
        debug!("No default output device");
        return Ok(None);
    };
    let output_name = output.name()?;

    let Some((device, supported)) = loopback_device(host, output, &output_name)? else {
        info!(output = %output_name, "No loopback source for default output");
        return Ok(None);
    };
    let format = CaptureFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::I32 => build_stream::<i32>(&device, &config, buffer)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer)?,
        other => return Err(AudioError::UnsupportedFormat(other.to_string())),
    };
    stream.play()?;

    let source = device.name()?;
    info!(
        output = %output_name,
        %source,
        sample_rate = format.sample_rate,
        channels = format.channels,
        "Loopback capture started"
    );
    Ok(Some((Capture { _stream: stream, output: output_name }, format)))
}

/// WASAPI opens render endpoints for capture in loopback mode.
#[cfg(windows)]
fn loopback_device(
    _host: &Host,
    output: Device,
    _output_name: &str,
) -> AudioResult<Option<(Device, SupportedStreamConfig)>> {
    let config = output.default_output_config()?;
    Ok(Some((output, config)))
}

/// Other hosts expose what a sink plays as a separate monitor input.
#[cfg(not(windows))]
fn loopback_device(
    host: &Host,
    _output: Device,
    output_name: &str,
) -> AudioResult<Option<(Device, SupportedStreamConfig)>> {
    let inputs: Vec<(Device, String)> = host
        .input_devices()?
        .filter_map(|device| device.name().ok().map(|name| (device, name)))
        .collect();
    let names: Vec<&str> = inputs.iter().map(|(_, name)| name.as_str()).collect();

    let Some(index) = pick_monitor(output_name, &names) else {
        return Ok(None);
    };
    let Some((device, _)) = inputs.into_iter().nth(index) else {
        return Ok(None);
    };
    let config = device.default_input_config()?;
    Ok(Some((device, config)))
}

/// Index of the monitor source for `output` among input device `names`,
/// falling back to any monitor.
#[cfg(any(not(windows), test))]
fn pick_monitor(output: &str, names: &[&str]) -> Option<usize> {
    let suffixed = format!("{output}.monitor");
    let described = format!("Monitor of {output}");

    names
        .iter()
        .position(|name| *name == suffixed || *name == described)
        .or_else(|| {
            names
                .iter()
                .position(|name| name.ends_with(".monitor") || name.starts_with("Monitor of "))
        })
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: Arc<CaptureBuffer>,
) -> AudioResult<Stream>
where
    T: SizedSample,
    i32: FromSample<T>,
{
    let mut scratch = Vec::with_capacity(FRAME_BYTES);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            encode_samples(data, &mut scratch);
            buffer.push(&scratch);
        },
        |err| error!(error = %err, "Loopback stream error"),
        None,
    )?;

    Ok(stream)
}

/// Convert callback samples to little-endian `i32` bytes in `out`.
fn encode_samples<T>(data: &[T], out: &mut Vec<u8>)
where
    T: Sample,
    i32: FromSample<T>,
{
    out.clear();
    for &sample in data {
        out.extend_from_slice(&i32::from_sample(sample).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_i32_samples_pass_through() {
        let mut out = Vec::new();
        encode_samples(&[0i32, -7, i32::MAX], &mut out);
        assert_eq!(decode(&out), vec![0, -7, i32::MAX]);
    }

    #[test]
    fn test_i16_samples_widen() {
        let mut out = Vec::new();
        encode_samples(&[1i16, -1], &mut out);
        assert_eq!(decode(&out), vec![1 << 16, -(1 << 16)]);
    }

    #[test]
    fn test_f32_samples_scale() {
        let mut out = Vec::new();
        encode_samples(&[0.0f32, 0.5, -0.5], &mut out);
        assert_eq!(decode(&out), vec![0, 1 << 30, -(1 << 30)]);
    }

    #[test]
    fn test_monitor_of_default_output_is_preferred() {
        let names = [
            "default",
            "alsa_output.usb-dac.analog-stereo.monitor",
            "alsa_input.pci.analog-stereo",
            "alsa_output.pci.analog-stereo.monitor",
        ];
        assert_eq!(pick_monitor("alsa_output.pci.analog-stereo", &names), Some(3));
    }

    #[test]
    fn test_monitor_by_description() {
        let names = ["Built-in Microphone", "Monitor of Speakers", "Monitor of HDMI"];
        assert_eq!(pick_monitor("HDMI", &names), Some(2));
    }

    #[test]
    fn test_any_monitor_is_a_fallback() {
        let names = ["Built-in Microphone", "Monitor of Speakers"];
        assert_eq!(pick_monitor("default", &names), Some(1));
    }

    #[test]
    fn test_no_monitor_means_no_source() {
        let names = ["default", "Built-in Microphone", "sysdefault:CARD=PCH"];
        assert_eq!(pick_monitor("default", &names), None);
        assert_eq!(pick_monitor("default", &[]), None);
    }

    #[test]
    fn test_scratch_is_reused() {
        let mut out = Vec::new();
        encode_samples(&[1i32; 8], &mut out);
        encode_samples(&[2i32; 2], &mut out);
        assert_eq!(decode(&out), vec![2, 2]);
    }
}
