// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// G-code workflow helpers: LED and job control, homing, positioning,
// temperature management with wait-until-reached polling, and the
// filament load sequence. Every step returns whether the printer
// positively acknowledged it; multi-step workflows stop at the first
// refused step.

use crate::client::PrinterClient;
use crate::commands;
use forgelink_core::error::Result;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Cadence of temperature polling during a wait.
const TEMP_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Ceiling on any temperature wait.
// TODO: make the wait ceiling configurable through TransportOptions.
const TEMP_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Nozzle temperature below which extrusion is refused.
const MIN_EXTRUDE_TEMP: i32 = 210;

/// Park position used by `rapid_home` before the real homing move.
const RAPID_HOME_PARK: (f64, f64, f64) = (105.0, 105.0, 220.0);
const RAPID_HOME_FEEDRATE: u32 = 9000;

/// Workflow helpers bound to one session; obtained via
/// [`PrinterClient::gcode`].
pub struct GCodeController<'a> {
    client: &'a PrinterClient,
}

impl<'a> GCodeController<'a> {
    pub(crate) fn new(client: &'a PrinterClient) -> Self {
        Self { client }
    }

    // -- LED and job control --

    pub async fn led_on(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::LED_ON).await
    }

    pub async fn led_off(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::LED_OFF).await
    }

    /// Start printing a stored file.
    pub async fn start_job(&self, file_name: &str) -> Result<bool> {
        self.client.send_cmd_ok(&commands::start_job(file_name)).await
    }

    pub async fn pause_job(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::PAUSE_PRINT).await
    }

    pub async fn resume_job(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::RESUME_PRINT).await
    }

    pub async fn stop_job(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::STOP_PRINT).await
    }

    /// Halt everything now.
    pub async fn emergency_stop(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::EMERGENCY_STOP).await
    }

    // -- Motion --

    /// Home all axes (slow; uses the long acknowledgement window).
    pub async fn home(&self) -> Result<bool> {
        self.client.send_cmd_ok(commands::HOME_AXES).await
    }

    /// Home via a park position: absolute mode, move to the centre at
    /// full height, then a standard home. Faster than homing from an
    /// arbitrary spot.
    pub async fn rapid_home(&self) -> Result<bool> {
        if !self.client.send_cmd_ok(commands::MOVE_MODE_ABSOLUTE).await? {
            return Ok(false);
        }
        let (x, y, z) = RAPID_HOME_PARK;
        if !self.move_to(x, y, z, RAPID_HOME_FEEDRATE).await? {
            return Ok(false);
        }
        self.home().await
    }

    pub async fn move_to(&self, x: f64, y: f64, z: f64, feedrate: u32) -> Result<bool> {
        self.client
            .send_cmd_ok(&commands::move_to(x, y, z, feedrate))
            .await
    }

    pub async fn move_xy(&self, x: f64, y: f64, feedrate: u32) -> Result<bool> {
        self.client
            .send_cmd_ok(&commands::move_xy(x, y, feedrate))
            .await
    }

    /// Feed filament (negative lengths retract).
    pub async fn extrude(&self, length_mm: i32, feedrate: u32) -> Result<bool> {
        self.client
            .send_cmd_ok(&commands::extrude(length_mm, feedrate))
            .await
    }

    // -- Temperature --

    /// Set the hot-end target; with `wait` the call returns once the
    /// reported temperature matches.
    pub async fn set_extruder_temp(&self, celsius: u32, wait: bool) -> Result<bool> {
        let ok = self
            .client
            .send_cmd_ok(&commands::set_extruder_temp(celsius))
            .await?;
        if !wait {
            return Ok(ok);
        }
        self.wait_for_extruder_temp(celsius).await
    }

    pub async fn cancel_extruder_temp(&self) -> Result<bool> {
        self.client
            .send_cmd_ok(&commands::set_extruder_temp(0))
            .await
    }

    /// Set the bed target; with `wait` the call returns once the
    /// reported temperature matches.
    pub async fn set_bed_temp(&self, celsius: u32, wait: bool) -> Result<bool> {
        let ok = self
            .client
            .send_cmd_ok(&commands::set_bed_temp(celsius))
            .await?;
        if !wait {
            return Ok(ok);
        }
        self.wait_for_bed_temp(celsius, false).await
    }

    /// Stop heating the bed; with `wait_for_cool`, block until it is
    /// touch-safe (37 °C).
    pub async fn cancel_bed_temp(&self, wait_for_cool: bool) -> Result<bool> {
        let ok = self.client.send_cmd_ok(&commands::set_bed_temp(0)).await?;
        if !wait_for_cool {
            return Ok(ok);
        }
        self.wait_for_bed_temp(37, true).await
    }

    /// Ask the machine to hold for the hot-end (`~M109`), then poll the
    /// temperature report once a second until it matches the target.
    /// `false` when the ceiling elapses first.
    pub async fn wait_for_extruder_temp(&self, celsius: u32) -> Result<bool> {
        let _ = self
            .client
            .send_cmd_ok(&commands::wait_extruder_temp(celsius))
            .await?;
        let deadline = Instant::now() + TEMP_WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(info) = self.client.get_temp_info().await? {
                if info.extruder.current == celsius as i32 {
                    return Ok(true);
                }
            }
            tokio::time::sleep(TEMP_POLL_INTERVAL).await;
        }
        warn!(target = celsius, "extruder temperature wait timed out");
        Ok(false)
    }

    /// Bed counterpart of [`wait_for_extruder_temp`]; `cooling` selects
    /// the `R` form so the machine also waits on the way down.
    ///
    /// [`wait_for_extruder_temp`]: Self::wait_for_extruder_temp
    pub async fn wait_for_bed_temp(&self, celsius: u32, cooling: bool) -> Result<bool> {
        let _ = self
            .client
            .send_cmd_ok(&commands::wait_bed_temp(celsius, cooling))
            .await?;
        let deadline = Instant::now() + TEMP_WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(info) = self.client.get_temp_info().await? {
                if info.bed.current == celsius as i32 {
                    return Ok(true);
                }
            }
            tokio::time::sleep(TEMP_POLL_INTERVAL).await;
        }
        warn!(target = celsius, "bed temperature wait timed out");
        Ok(false)
    }

    // -- Filament --

    /// Get the machine ready to take new filament: clear any heat, home,
    /// park the head, heat to the filament's load temperature, then purge
    /// the old material.
    pub async fn prepare_filament_load(&self, load_temp: u32) -> Result<bool> {
        if !self.cancel_extruder_temp().await? {
            return Ok(false);
        }
        if !self.client.send_cmd_ok(commands::MOVE_MODE_ABSOLUTE).await? {
            return Ok(false);
        }
        if !self.home().await? {
            return Ok(false);
        }
        if !self.move_xy(0.0, 0.0, 9000).await? {
            return Ok(false);
        }
        if !self.set_extruder_temp(load_temp, true).await? {
            return Ok(false);
        }
        self.extrude(300, commands::DEFAULT_EXTRUDE_FEEDRATE).await
    }

    /// Feed a full load of filament. Refused while the nozzle is cold.
    pub async fn load_filament(&self) -> Result<bool> {
        if !self.can_extrude().await? {
            warn!("filament load refused: nozzle not hot enough");
            return Ok(false);
        }
        self.extrude(250, commands::DEFAULT_EXTRUDE_FEEDRATE).await
    }

    /// Short purge to get clean material flowing. Refused while the
    /// nozzle is cold.
    pub async fn prime_nozzle(&self) -> Result<bool> {
        if !self.can_extrude().await? {
            warn!("nozzle prime refused: nozzle not hot enough");
            return Ok(false);
        }
        self.extrude(125, commands::DEFAULT_EXTRUDE_FEEDRATE).await
    }

    /// Wind down after loading: stop heating, give the hot-end a moment
    /// to stabilise, then home.
    pub async fn finish_filament_load(&self) -> Result<bool> {
        if !self.cancel_extruder_temp().await? {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.home().await
    }

    async fn can_extrude(&self) -> Result<bool> {
        let Some(info) = self.client.get_temp_info().await? else {
            return Ok(false);
        };
        Ok(info.extruder.current >= MIN_EXTRUDE_TEMP)
    }
}
