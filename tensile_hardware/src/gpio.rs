//! Raspberry Pi GPIO backends (feature `hardware`, Linux only).
//!
//! - `Hx711LoadCell`: bit-banged HX711 bridge ADC with data-ready timeout.
//! - `GpioLimitSwitch`: debounce-free digital input (conditioning happens
//!   in the motion controller).
//! - `GpioStepperDriver`: step/dir pulse generator on a worker thread.
//!   Pulses run at the commanded rate; acceleration shaping is left to the
//!   external driver module, which is why the motion controller keeps a
//!   braking margin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tensile_traits::{LimitSwitch, LoadCell, StepDirection, StepperDriver};
use tracing::trace;

use crate::error::{HwError, Result};

pub struct Hx711LoadCell {
    dt: rppal::gpio::InputPin,
    sck: rppal::gpio::OutputPin,
    gain_pulses: u8, // 25, 26, 27 based on gain/channel
}

impl Hx711LoadCell {
    pub fn new(dt_pin: u8, sck_pin: u8, gain_pulses: u8) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let dt = gpio
            .get(dt_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        let mut sck = gpio
            .get(sck_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        sck.set_low(); // clock idle low
        Ok(Self {
            dt,
            sck,
            gain_pulses,
        })
    }

    fn read_raw(&mut self, timeout: Duration) -> Result<i32> {
        let deadline = Instant::now() + timeout;

        // Wait for data ready (DT goes low)
        while self.dt.is_high() {
            if Instant::now() >= deadline {
                return Err(HwError::DataReadyTimeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        // Clock out 24 bits
        let mut value: i32 = 0;
        for _ in 0..24 {
            self.sck.set_high();
            spin_delay_100ns();
            value = (value << 1) | i32::from(self.dt.is_high());
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Pulse gain to set next measurement
        for _ in 0..self.gain_pulses {
            self.sck.set_high();
            spin_delay_100ns();
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Sign extend 24-bit
        if (value & 0x80_0000) != 0 {
            value |= !0xFF_FFFF;
        }
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }
}

impl LoadCell for Hx711LoadCell {
    fn read(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.read_raw(timeout)?)
    }
}

#[inline(always)]
fn spin_delay_100ns() {
    std::hint::spin_loop();
}

pub struct GpioLimitSwitch {
    pin: rppal::gpio::InputPin,
    active_low: bool,
}

impl GpioLimitSwitch {
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        Ok(Self { pin, active_low })
    }
}

impl LimitSwitch for GpioLimitSwitch {
    fn is_active(&mut self) -> std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let level = self.pin.is_high();
        Ok(if self.active_low { !level } else { level })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Idle,
    MoveTo(i64),
    Continuous(StepDirection),
}

struct StepperShared {
    cmd: Mutex<(Motion, f32)>, // motion, steps per second
    wake: Condvar,
    pos: AtomicI64,
    running: AtomicBool,
    shutdown: AtomicBool,
}

/// Step/dir pulse generator. The worker thread owns the pins; command
/// state lives in shared atomics so queries never block on the pulse loop.
pub struct GpioStepperDriver {
    shared: Arc<StepperShared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl GpioStepperDriver {
    pub fn new(step_pin: u8, dir_pin: u8, en_pin: Option<u8>) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut step = gpio
            .get(step_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        let mut dir = gpio
            .get(dir_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        let mut en = match en_pin {
            Some(p) => Some(
                gpio.get(p)
                    .map_err(|e| HwError::Gpio(e.to_string()))?
                    .into_output(),
            ),
            None => None,
        };
        step.set_low();
        dir.set_low();
        if let Some(en) = en.as_mut() {
            en.set_low(); // most drivers enable active-low
        }

        let shared = Arc::new(StepperShared {
            cmd: Mutex::new((Motion::Idle, 1000.0)),
            wake: Condvar::new(),
            pos: AtomicI64::new(0),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = shared.clone();

        let worker = std::thread::spawn(move || {
            pulse_loop(&worker_shared, &mut step, &mut dir);
        });

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn command(&self, motion: Motion) {
        if let Ok(mut guard) = self.shared.cmd.lock() {
            guard.0 = motion;
            self.shared
                .running
                .store(guard.0 != Motion::Idle, Ordering::Release);
            self.shared.wake.notify_one();
        }
    }
}

fn pulse_loop(
    shared: &StepperShared,
    step: &mut rppal::gpio::OutputPin,
    dir_pin: &mut rppal::gpio::OutputPin,
) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let (motion, sps) = {
            let Ok(mut guard) = shared.cmd.lock() else {
                break;
            };
            while guard.0 == Motion::Idle && !shared.shutdown.load(Ordering::Acquire) {
                let Ok(g) = shared.wake.wait_timeout(guard, Duration::from_millis(50)) else {
                    return;
                };
                guard = g.0;
            }
            *guard
        };
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let pos = shared.pos.load(Ordering::Acquire);
        let dir: i64 = match motion {
            Motion::Idle => continue,
            Motion::MoveTo(t) if t > pos => 1,
            Motion::MoveTo(t) if t < pos => -1,
            Motion::MoveTo(_) => {
                // Target reached
                if let Ok(mut guard) = shared.cmd.lock() {
                    if guard.0 == motion {
                        guard.0 = Motion::Idle;
                        shared.running.store(false, Ordering::Release);
                    }
                }
                continue;
            }
            Motion::Continuous(d) => i64::from(d),
        };

        if dir >= 0 {
            dir_pin.set_high();
        } else {
            dir_pin.set_low();
        }

        // One pulse; half period high, half low.
        let half = Duration::from_micros(((1_000_000.0 / sps.max(1.0)) / 2.0) as u64);
        step.set_high();
        std::thread::sleep(half);
        step.set_low();
        std::thread::sleep(half);
        shared.pos.fetch_add(dir, Ordering::AcqRel);
    }
}

impl Drop for GpioStepperDriver {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl StepperDriver for GpioStepperDriver {
    fn move_relative(
        &mut self,
        steps: i64,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let target = self.shared.pos.load(Ordering::Acquire) + steps;
        self.command(Motion::MoveTo(target));
        Ok(())
    }

    fn move_absolute(
        &mut self,
        steps: i64,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.command(Motion::MoveTo(steps));
        Ok(())
    }

    fn run_continuous(
        &mut self,
        dir: StepDirection,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.command(Motion::Continuous(dir));
        Ok(())
    }

    fn stop_decelerating(
        &mut self,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.command(Motion::Idle);
        Ok(())
    }

    fn stop_immediate(
        &mut self,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.command(Motion::Idle);
        Ok(())
    }

    fn set_speed(
        &mut self,
        steps_per_sec: f32,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut guard) = self.shared.cmd.lock() {
            guard.1 = steps_per_sec.max(1.0);
        }
        Ok(())
    }

    fn set_acceleration(
        &mut self,
        _steps_per_sec2: f32,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Ramp shaping happens in the external driver module.
        Ok(())
    }

    fn set_current_position(
        &mut self,
        steps: i64,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.shared.pos.store(steps, Ordering::Release);
        Ok(())
    }

    fn current_position(&self) -> i64 {
        self.shared.pos.load(Ordering::Acquire)
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn direction(&self) -> StepDirection {
        let pos = self.shared.pos.load(Ordering::Acquire);
        match self.shared.cmd.lock() {
            Ok(guard) => match guard.0 {
                Motion::Idle => 0,
                Motion::MoveTo(t) if t > pos => 1,
                Motion::MoveTo(t) if t < pos => -1,
                Motion::MoveTo(_) => 0,
                Motion::Continuous(d) => d,
            },
            Err(_) => 0,
        }
    }
}
