// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synchronization loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandReceiver;
use crate::config::Config;
use crate::error::Result;
use crate::gpio::PinDriver;
use crate::pin::{InputPin, OutputPin};
use crate::protocol::{Broker, Qos};
use crate::types::{PinState, TopicScheme};

use super::connection::{ConnectionManager, Connectivity};
use super::subscription::SubscriptionManager;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The broker session was up; everything below was attempted.
    pub connected: bool,
    /// Every command topic is subscribed after this tick.
    pub subscribed: bool,
    /// Pending commands applied to outputs.
    pub commands_applied: usize,
    /// State messages published.
    pub published: usize,
    /// State messages that could not be published.
    pub publish_failures: usize,
    /// Failed pin reads or writes.
    pub hardware_errors: usize,
}

/// Keeps hardware, cached state and broker topics in step.
///
/// Owns every pin. Each tick runs, in order:
///
/// 1. make sure the broker session is up, or skip the tick
/// 2. renew command subscriptions if any are missing
/// 3. apply staged commands to the outputs
/// 4. publish every output and input whose live level left its cache
/// 5. commit every output, then every input
///
/// Publishing reads the cache before commit rewrites it, so the payload of a
/// change is always the pre-commit state: for an output the value commit is
/// about to drive, for an input the level it held until this tick.
pub struct Bridge<B> {
    broker: B,
    outputs: Vec<OutputPin>,
    inputs: Vec<InputPin>,
    topics: TopicScheme,
    command_topics: Vec<String>,
    commands: CommandReceiver,
    connection: ConnectionManager,
    subscriptions: SubscriptionManager,
    poll_interval: Duration,
    connect_backoff: Duration,
}

impl<B: Broker> Bridge<B> {
    /// Claims every configured pin and assembles the loop.
    ///
    /// `commands` must come from [`Config::command_handler`] for the same
    /// configuration so that output indices line up.
    ///
    /// # Errors
    ///
    /// Returns an error if a pin number cannot be translated or a pin cannot
    /// be claimed.
    pub fn new(
        config: &Config,
        driver: Arc<dyn PinDriver>,
        broker: B,
        commands: CommandReceiver,
    ) -> Result<Self> {
        let numbering = config.pins.numbering;

        let mut outputs = Vec::with_capacity(config.pins.outputs.len());
        for output in &config.pins.outputs {
            let id = numbering.to_bcm(output.pin)?;
            outputs.push(OutputPin::new(output.name.as_str(), id, Arc::clone(&driver))?);
        }

        let mut inputs = Vec::with_capacity(config.pins.inputs.len());
        for input in &config.pins.inputs {
            let id = numbering.to_bcm(input.pin)?;
            inputs.push(InputPin::new(
                input.name.as_str(),
                id,
                input.pull,
                input.debounce(),
                Arc::clone(&driver),
            )?);
        }

        let topics = config.bridge.topics();
        let command_topics = outputs
            .iter()
            .map(|output| topics.output_command(output.name()))
            .collect();

        tracing::info!(
            outputs = outputs.len(),
            inputs = inputs.len(),
            prefix = %topics.prefix(),
            "Bridge ready"
        );

        Ok(Self {
            broker,
            outputs,
            inputs,
            topics,
            command_topics,
            commands,
            connection: ConnectionManager::new(
                config.bridge.connect_attempts,
                config.bridge.connect_poll_interval(),
            ),
            subscriptions: SubscriptionManager::new(),
            poll_interval: config.bridge.poll_interval(),
            connect_backoff: config.bridge.connect_backoff(),
        })
    }

    /// Returns the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Looks up an output by name.
    pub fn output(&self, name: &str) -> Option<&OutputPin> {
        self.outputs.iter().find(|output| output.name() == name)
    }

    /// Looks up an input by name.
    pub fn input(&self, name: &str) -> Option<&InputPin> {
        self.inputs.iter().find(|input| input.name() == name)
    }

    /// Returns whether every command topic is currently subscribed.
    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.is_subscribed()
    }

    /// Runs ticks forever at the configured poll interval.
    pub async fn run(&mut self) {
        self.run_until(std::future::pending()).await;
    }

    /// Runs ticks at the configured poll interval until `shutdown` resolves.
    ///
    /// A tick that finds the broker unreachable is followed by an extra
    /// backoff pause. `shutdown` is only observed during the pauses, so a
    /// tick in progress always completes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            let report = self.tick().await;
            if !report.connected {
                tokio::select! {
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(self.connect_backoff) => {}
                }
            }
        }
        tracing::debug!("Synchronization loop stopped");
    }

    /// Runs one iteration of the loop, without the leading poll pause.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        match self.connection.ensure_connected(&self.broker).await {
            Ok(Connectivity::Established) => {}
            Ok(Connectivity::Fresh) => {
                tracing::info!("Broker session started");
                self.subscriptions.reset();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Broker unreachable, retrying");
                self.subscriptions.reset();
                return report;
            }
        }
        report.connected = true;

        if self.broker.take_subscription_rejection() {
            tracing::warn!("Broker refused a command subscription, resubscribing");
            self.subscriptions.reset();
        }
        if !self.subscriptions.is_subscribed() {
            self.subscriptions
                .sweep(&self.broker, &self.command_topics)
                .await;
        }
        report.subscribed = self.subscriptions.is_subscribed();

        report.commands_applied = self.apply_staged_commands();

        for output in &self.outputs {
            match output.changed() {
                Ok(true) => {
                    let topic = self.topics.output_state(output.name());
                    let state = output.get().into();
                    publish_state(&self.broker, &topic, state, &mut report).await;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(pin = %output.name(), error = %e, "Reading output failed");
                    report.hardware_errors += 1;
                }
            }
        }

        for input in &mut self.inputs {
            match input.changed() {
                Ok(true) => {
                    let topic = self.topics.input_state(input.name());
                    let state = input.get().into();
                    publish_state(&self.broker, &topic, state, &mut report).await;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(pin = %input.name(), error = %e, "Reading input failed");
                    report.hardware_errors += 1;
                }
            }
        }

        for output in &self.outputs {
            if let Err(e) = output.commit() {
                tracing::warn!(pin = %output.name(), error = %e, "Driving output failed");
                report.hardware_errors += 1;
            }
        }
        for input in &mut self.inputs {
            if let Err(e) = input.commit() {
                tracing::warn!(pin = %input.name(), error = %e, "Sampling input failed");
                report.hardware_errors += 1;
            }
        }

        report
    }

    /// Disconnects from the broker and releases every pin.
    pub async fn shutdown(self) {
        if let Err(e) = self.broker.disconnect().await {
            tracing::warn!(error = %e, "Disconnecting from broker failed");
        }
        for output in &self.outputs {
            output.release();
        }
        for input in &self.inputs {
            input.release();
        }
        tracing::info!(
            pins = self.outputs.len() + self.inputs.len(),
            "Released hardware pins"
        );
    }

    fn apply_staged_commands(&mut self) -> usize {
        let mut applied = 0;
        for command in self.commands.drain() {
            if let Some(output) = self.outputs.get_mut(command.output) {
                output.set(command.state.is_on());
                applied += 1;
            } else {
                tracing::warn!(output = command.output, "Dropping command for unknown output");
            }
        }
        applied
    }
}

async fn publish_state<B: Broker>(
    broker: &B,
    topic: &str,
    state: PinState,
    report: &mut TickReport,
) {
    tracing::debug!(topic = %topic, state = %state, "Publishing state");
    match broker
        .publish(topic, state.as_str(), Qos::ExactlyOnce, true)
        .await
    {
        Ok(()) => report.published += 1,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Publishing state failed");
            report.publish_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandHandler;
    use crate::gpio::MemoryDriver;
    use crate::sync::testing::{Published, ScriptedBroker};

    const CONFIG: &str = r#"
        [broker]
        host = "server.lan"

        [pins]
        outputs = [
            { name = "Output_01", pin = 11 },
            { name = "Output_02", pin = 17 },
        ]
        inputs = [
            { name = "Schalter_01", pin = 14 },
            { name = "Schalter_02", pin = 15 },
        ]
    "#;

    struct Harness {
        bridge: Bridge<ScriptedBroker>,
        driver: Arc<MemoryDriver>,
        handler: CommandHandler,
    }

    fn harness_with(broker: ScriptedBroker, driver: Arc<MemoryDriver>) -> Harness {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let (handler, commands) = config.command_handler();
        let bridge = Bridge::new(&config, driver.clone(), broker, commands).unwrap();
        Harness {
            bridge,
            driver,
            handler,
        }
    }

    fn harness() -> Harness {
        let broker = ScriptedBroker::new();
        broker.connect_after_polls(0);
        harness_with(broker, Arc::new(MemoryDriver::new()))
    }

    fn state(topic: &str, payload: &str) -> Published {
        Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos: Qos::ExactlyOnce,
            retain: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_connects_and_subscribes() {
        let mut h = harness();

        let report = h.bridge.tick().await;
        assert!(report.connected);
        assert!(report.subscribed);
        assert_eq!(report.published, 0);
        assert_eq!(h.bridge.broker().connect_calls(), 1);
        assert_eq!(
            h.bridge.broker().subscriptions(),
            vec![
                ("living_room/output/Output_01/set".to_string(), Qos::ExactlyOnce),
                ("living_room/output/Output_02/set".to_string(), Qos::ExactlyOnce),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connected_ticks_do_not_reconnect_or_resubscribe() {
        let mut h = harness();
        h.bridge.tick().await;
        h.bridge.broker().clear();

        h.bridge.tick().await;
        h.bridge.tick().await;
        assert_eq!(h.bridge.broker().connect_calls(), 1);
        assert!(h.bridge.broker().subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_broker_skips_tick() {
        let mut h = harness_with(ScriptedBroker::new(), Arc::new(MemoryDriver::new()));
        h.driver.set_level(14, true);
        assert!(h.handler.handle("living_room/output/Output_01/set", b"ON"));

        let report = h.bridge.tick().await;
        assert_eq!(report, TickReport::default());
        assert!(!h.bridge.is_subscribed());
        assert!(h.bridge.broker().published().is_empty());
        assert!(!h.bridge.input("Schalter_01").unwrap().get());
        assert!(!h.bridge.output("Output_01").unwrap().get());
        assert_eq!(h.driver.level(11), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_failure_forces_full_resweep() {
        let mut h = harness();
        h.bridge
            .broker()
            .fail_subscribe("living_room/output/Output_01/set");

        let report = h.bridge.tick().await;
        assert!(!report.subscribed);
        assert_eq!(h.bridge.broker().subscriptions().len(), 1);

        h.bridge
            .broker()
            .heal_subscribe("living_room/output/Output_01/set");
        h.bridge.broker().clear();
        let report = h.bridge.tick().await;
        assert!(report.subscribed);
        assert_eq!(h.bridge.broker().subscriptions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn broker_rejection_forces_resweep() {
        let mut h = harness();
        h.bridge.tick().await;
        h.bridge.broker().clear();

        h.bridge.broker().reject_subscriptions();
        let report = h.bridge.tick().await;
        assert!(report.subscribed);
        assert_eq!(h.bridge.broker().subscriptions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_session_resubscribes() {
        let mut h = harness();
        h.bridge.tick().await;
        h.bridge.broker().clear();

        h.bridge.broker().drop_session();
        let report = h.bridge.tick().await;
        assert!(report.connected);
        assert_eq!(h.bridge.broker().connect_calls(), 2);
        assert_eq!(h.bridge.broker().subscriptions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn input_change_publishes_pre_commit_state_then_commits() {
        let mut h = harness();
        h.bridge.tick().await;

        h.driver.set_level(14, true);
        let report = h.bridge.tick().await;
        assert_eq!(report.published, 1);
        assert_eq!(
            h.bridge.broker().published(),
            vec![state("living_room/input/Schalter_01", "OFF")]
        );
        assert!(h.bridge.input("Schalter_01").unwrap().get());

        h.bridge.broker().clear();
        let report = h.bridge.tick().await;
        assert_eq!(report.published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn command_round_trip() {
        let mut h = harness();
        h.bridge.tick().await;

        assert!(h.handler.handle("living_room/output/Output_01/set", b"ON"));
        let report = h.bridge.tick().await;
        assert_eq!(report.commands_applied, 1);
        assert_eq!(
            h.bridge.broker().published(),
            vec![state("living_room/output/Output_01", "ON")]
        );
        assert!(h.bridge.output("Output_01").unwrap().get());
        assert_eq!(h.driver.level(11), Some(true));

        h.bridge.broker().clear();
        h.bridge.tick().await;
        assert!(h.bridge.broker().published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn command_matching_hardware_is_not_published() {
        let broker = ScriptedBroker::new();
        broker.connect_after_polls(0);
        let driver = Arc::new(MemoryDriver::new());
        driver.set_level(11, true);
        let mut h = harness_with(broker, driver);
        h.bridge.tick().await;

        assert!(h.handler.handle("living_room/output/Output_01/set", b"ON"));
        let report = h.bridge.tick().await;
        assert_eq!(report.commands_applied, 1);
        assert!(h.bridge.broker().published().is_empty());
        assert!(h.bridge.output("Output_01").unwrap().get());
    }

    #[tokio::test(start_paused = true)]
    async fn external_output_toggle_is_reported_and_reverted() {
        let mut h = harness();
        h.bridge.tick().await;

        h.driver.set_level(17, true);
        h.bridge.tick().await;
        assert_eq!(
            h.bridge.broker().published(),
            vec![state("living_room/output/Output_02", "OFF")]
        );
        assert_eq!(h.driver.level(17), Some(false));
        assert!(!h.bridge.output("Output_02").unwrap().get());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_does_not_affect_siblings() {
        let mut h = harness();
        h.bridge.tick().await;
        h.bridge.broker().fail_publish("living_room/output/Output_01");

        assert!(h.handler.handle("living_room/output/Output_01/set", b"ON"));
        assert!(h.handler.handle("living_room/output/Output_02/set", b"ON"));
        h.driver.set_level(15, true);
        let report = h.bridge.tick().await;

        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.published, 2);
        assert_eq!(
            h.bridge.broker().published(),
            vec![
                state("living_room/output/Output_02", "ON"),
                state("living_room/input/Schalter_02", "OFF"),
            ]
        );
        assert_eq!(h.driver.level(11), Some(true));
        assert_eq!(h.driver.level(17), Some(true));
        assert!(h.bridge.input("Schalter_02").unwrap().get());
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_failure_is_isolated() {
        let mut h = harness();
        h.bridge.tick().await;

        h.driver.break_line(14);
        h.driver.set_level(15, true);
        let report = h.bridge.tick().await;
        assert_eq!(report.hardware_errors, 2);
        assert_eq!(
            h.bridge.broker().published(),
            vec![state("living_room/input/Schalter_02", "OFF")]
        );

        h.driver.repair(14);
        h.bridge.broker().clear();
        let report = h.bridge.tick().await;
        assert_eq!(report.hardware_errors, 0);
        assert!(h.bridge.broker().published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_payload_leaves_output_untouched() {
        let mut h = harness();
        h.bridge.tick().await;

        for payload in [&b"on"[..], b"1", b"TOGGLE"] {
            assert!(!h.handler.handle("living_room/output/Output_01/set", payload));
        }
        let report = h.bridge.tick().await;
        assert_eq!(report.commands_applied, 0);
        assert!(!h.bridge.output("Output_01").unwrap().get());
        assert!(h.bridge.broker().published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_paces_ticks() {
        let mut h = harness();
        let _ = tokio::time::timeout(Duration::from_millis(350), h.bridge.run()).await;

        assert_eq!(h.bridge.broker().connect_calls(), 1);
        assert_eq!(h.bridge.broker().subscriptions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_backs_off_while_unreachable() {
        let mut h = harness_with(ScriptedBroker::new(), Arc::new(MemoryDriver::new()));
        // A failed tick takes 0.1 s pause, 5 s of polling, then 1 s backoff.
        let _ = tokio::time::timeout(Duration::from_secs(12), h.bridge.run()).await;
        assert_eq!(h.bridge.broker().connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_finishes_the_tick_in_progress() {
        let mut h = harness_with(ScriptedBroker::new(), Arc::new(MemoryDriver::new()));
        let start = tokio::time::Instant::now();

        // Fires while the first tick is still polling the broker.
        h.bridge
            .run_until(tokio::time::sleep(Duration::from_secs(2)))
            .await;

        assert_eq!(start.elapsed(), Duration::from_millis(5100));
        assert_eq!(h.bridge.broker().connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_before_next_tick() {
        let mut h = harness();
        h.bridge
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(h.bridge.broker().connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn command_burst_applies_latest_state() {
        let mut h = harness();
        h.bridge.tick().await;

        for payload in [&b"ON"[..], b"OFF", b"ON"] {
            assert!(h.handler.handle("living_room/output/Output_01/set", payload));
        }
        for payload in [&b"OFF"[..], b"ON", b"OFF"] {
            assert!(h.handler.handle("living_room/output/Output_02/set", payload));
        }
        let report = h.bridge.tick().await;

        assert_eq!(report.commands_applied, 2);
        assert!(h.bridge.output("Output_01").unwrap().get());
        assert!(!h.bridge.output("Output_02").unwrap().get());
        assert_eq!(h.driver.level(11), Some(true));
        assert_eq!(h.driver.level(17), Some(false));
        assert_eq!(
            h.bridge.broker().published(),
            vec![state("living_room/output/Output_01", "ON")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_and_releases() {
        let driver = Arc::new(MemoryDriver::new());
        let broker = Arc::new(ScriptedBroker::new());
        broker.connect_after_polls(0);
        let config = Config::from_toml_str(CONFIG).unwrap();
        let (_handler, commands) = config.command_handler();
        let mut bridge =
            Bridge::new(&config, driver.clone(), Arc::clone(&broker), commands).unwrap();
        bridge.tick().await;
        assert!(driver.is_claimed(11));
        assert!(broker.is_connected());

        bridge.shutdown().await;
        assert_eq!(broker.disconnect_calls(), 1);
        assert!(!broker.is_connected());
        for id in [11, 17, 14, 15] {
            assert!(!driver.is_claimed(id), "pin {id}");
        }
    }

    #[test]
    fn claim_failure_aborts_construction() {
        let driver = Arc::new(MemoryDriver::new());
        driver.break_line(17);
        let config = Config::from_toml_str(CONFIG).unwrap();
        let (_handler, commands) = config.command_handler();
        let result = Bridge::new(&config, driver, ScriptedBroker::new(), commands);
        assert!(result.is_err());
    }
}
