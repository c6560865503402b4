use crate::core::track::SurfaceType;
use crate::core::vehicle::{Controls, VehicleState};
use anyhow::Context;
use flume::Sender;
use serde::Serialize;
use std::io::Write;

/// Per-car state captured for telemetry consumers.
/// * `x`, `y` - (m) Position
/// * `heading` - (rad) Yaw angle
/// * `speed` - (m/s) Speed
/// * `yaw_rate` - (rad/s) Yaw rate
/// * `tire_temps` - (°C) Tire temperatures FL, FR, RL, RR
/// * `tire_wear` - () Tread left on the fitted set (1.0 fresh)
/// * `s_track` - (m) Track coordinate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
    pub yaw_rate: f64,
    pub rpm: f64,
    pub gear: u8,
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
    pub tire_temps: [f64; 4],
    pub tire_wear: f64,
    pub s_track: f64,
    pub lap: u32,
    pub surface: SurfaceType,
}

impl StateSnapshot {
    pub fn new(
        state: &VehicleState,
        controls: &Controls,
        s_track: f64,
        lap: u32,
        surface: SurfaceType,
    ) -> StateSnapshot {
        StateSnapshot {
            x: state.position.x,
            y: state.position.y,
            heading: state.heading(),
            speed: state.speed(),
            yaw_rate: state.yaw_rate,
            rpm: state.rpm,
            gear: state.gear,
            throttle: controls.throttle,
            brake: controls.brake,
            steering: controls.steering,
            tire_temps: state.tire_temps,
            tire_wear: state.tires.wear,
            s_track,
            lap,
            surface,
        }
    }
}

/// One telemetry row. Flat so that it can be written as a CSV record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub car_id: u32,
    pub tick: u64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
    pub yaw_rate: f64,
    pub rpm: f64,
    pub gear: u8,
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
    pub tire_temp_fl: f64,
    pub tire_temp_fr: f64,
    pub tire_temp_rl: f64,
    pub tire_temp_rr: f64,
    pub tire_wear: f64,
    pub s_track: f64,
    pub lap: u32,
    pub surface: SurfaceType,
}

impl TelemetrySample {
    pub fn new(car_id: u32, tick: u64, snapshot: &StateSnapshot) -> TelemetrySample {
        TelemetrySample {
            car_id,
            tick,
            x: snapshot.x,
            y: snapshot.y,
            heading: snapshot.heading,
            speed: snapshot.speed,
            yaw_rate: snapshot.yaw_rate,
            rpm: snapshot.rpm,
            gear: snapshot.gear,
            throttle: snapshot.throttle,
            brake: snapshot.brake,
            steering: snapshot.steering,
            tire_temp_fl: snapshot.tire_temps[0],
            tire_temp_fr: snapshot.tire_temps[1],
            tire_temp_rl: snapshot.tire_temps[2],
            tire_temp_rr: snapshot.tire_temps[3],
            tire_wear: snapshot.tire_wear,
            s_track: snapshot.s_track,
            lap: snapshot.lap,
            surface: snapshot.surface,
        }
    }
}

/// Receiver of telemetry samples.
pub trait TelemetrySink {
    fn record_sample(&mut self, car_id: u32, tick: u64, snapshot: &StateSnapshot);

    /// flush forwards buffered data and reports errors that occurred while recording.
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory buffer filled during the ticks. It never blocks and never fails, the samples are
/// handed to the actual sink outside of the tick.
#[derive(Debug, Default, Clone)]
pub struct TelemetryBuffer {
    entries: Vec<(u32, u64, StateSnapshot)>,
}

impl TelemetryBuffer {
    pub fn new() -> TelemetryBuffer {
        TelemetryBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// flush_into moves all buffered samples into the sink and flushes it. Returns the number of
    /// forwarded samples.
    pub fn flush_into(&mut self, sink: &mut dyn TelemetrySink) -> anyhow::Result<usize> {
        let no_samples = self.entries.len();
        for (car_id, tick, snapshot) in self.entries.drain(..) {
            sink.record_sample(car_id, tick, &snapshot);
        }
        sink.flush()?;
        Ok(no_samples)
    }
}

impl TelemetrySink for TelemetryBuffer {
    fn record_sample(&mut self, car_id: u32, tick: u64, snapshot: &StateSnapshot) {
        self.entries.push((car_id, tick, snapshot.to_owned()));
    }
}

/// Keeps all samples in memory, e.g. for tests or post-processing.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub samples: Vec<TelemetrySample>,
}

impl TelemetrySink for MemorySink {
    fn record_sample(&mut self, car_id: u32, tick: u64, snapshot: &StateSnapshot) {
        self.samples.push(TelemetrySample::new(car_id, tick, snapshot));
    }
}

/// Writes samples as CSV records. The first write error is kept and returned by flush.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    error: Option<csv::Error>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> CsvSink<W> {
        CsvSink {
            writer: csv::Writer::from_writer(inner),
            error: None,
        }
    }

    pub fn into_inner(self) -> anyhow::Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to finish telemetry CSV: {}", e.error()))
    }
}

impl<W: Write> TelemetrySink for CsvSink<W> {
    fn record_sample(&mut self, car_id: u32, tick: u64, snapshot: &StateSnapshot) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.writer.serialize(TelemetrySample::new(car_id, tick, snapshot)) {
            self.error = Some(e);
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e).context("Failed to write telemetry record!");
        }
        self.writer.flush().context("Failed to flush telemetry CSV!")?;
        Ok(())
    }
}

/// Forwards samples to another thread. A disconnected receiver is reported by flush.
pub struct ChannelSink {
    tx: Sender<TelemetrySample>,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(tx: Sender<TelemetrySample>) -> ChannelSink {
        ChannelSink {
            tx,
            disconnected: false,
        }
    }
}

impl TelemetrySink for ChannelSink {
    fn record_sample(&mut self, car_id: u32, tick: u64, snapshot: &StateSnapshot) {
        if self.disconnected {
            return;
        }
        if self.tx.send(TelemetrySample::new(car_id, tick, snapshot)).is_err() {
            self.disconnected = true;
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.disconnected {
            anyhow::bail!("Telemetry receiver disconnected!");
        }
        Ok(())
    }
}
