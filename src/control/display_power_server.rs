//! The actor owning every display controller of the process.

use crate::{
    armaf::{spawn_server, ActorPort, Server},
    config::{BrightnessLimits, Config},
    external::{
        brightness_store::BrightnessStore,
        dependency_provider::DependencyProvider,
        screen_action::{DisplayState, ScreenAction},
    },
    system::screen_controller::{DisplayEvent, ScreenController, ScreenError},
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum DisplayRequest {
    SetDisplayState {
        display: u32,
        state: DisplayState,
        reason: u32,
    },
    GetDisplayState(u32),
    GetDisplayIds,
    GetMainDisplayId,
    SetBrightness {
        display: u32,
        value: u32,
        gradual_duration: Duration,
    },
    /// Like `SetBrightness`, but negative values are accepted and clamped
    AdjustBrightness {
        display: u32,
        value: i32,
        duration: Duration,
    },
    OverrideBrightness {
        display: u32,
        value: u32,
        gradual_duration: Duration,
    },
    RestoreBrightness {
        display: u32,
        gradual_duration: Duration,
    },
    BoostBrightness {
        display: u32,
        timeout: Duration,
        gradual_duration: Duration,
    },
    CancelBoostBrightness {
        display: u32,
        gradual_duration: Duration,
    },
    DiscountBrightness {
        display: u32,
        discount: f64,
        gradual_duration: Duration,
    },
    GetBrightness(u32),
    GetDeviceBrightness(u32),
    IsScreenOn(u32),
    RegisterObserver,
    Dump,
}

#[derive(Debug)]
pub enum DisplayResponse {
    Done(bool),
    State(DisplayState),
    Brightness(u32),
    DisplayIds(Vec<u32>),
    DisplayId(u32),
    Observer(broadcast::Receiver<DisplayEvent>),
    Dump(String),
}

pub type DisplayPowerPort = ActorPort<DisplayRequest, DisplayResponse, anyhow::Error>;

pub struct DisplayPowerServer<A: ScreenAction, S: BrightnessStore> {
    config: Config,
    provider: DependencyProvider<A, S>,
    events: broadcast::Sender<DisplayEvent>,
    controllers: BTreeMap<u32, Arc<ScreenController<A, S>>>,
    main_display: u32,
}

impl<A: ScreenAction, S: BrightnessStore> DisplayPowerServer<A, S> {
    pub fn new(config: Config, provider: DependencyProvider<A, S>) -> DisplayPowerServer<A, S> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        DisplayPowerServer {
            main_display: config.displays.main,
            config,
            provider,
            events,
            controllers: BTreeMap::new(),
        }
    }

    pub async fn spawn(self) -> Result<DisplayPowerPort> {
        spawn_server(self).await
    }

    fn limits(&self) -> BrightnessLimits {
        self.config.brightness
    }

    fn controller(&self, display: u32) -> Option<&Arc<ScreenController<A, S>>> {
        let controller = self.controllers.get(&display);
        if controller.is_none() {
            log::warn!("Request ignored: {}", ScreenError::UnknownDisplay(display));
        }
        controller
    }

    fn safe_brightness(&self, value: u32) -> u32 {
        let limits = self.limits();
        let safe = limits.clamp(value);
        if safe != value {
            log::warn!(
                "Brightness {} is outside of {}..={}, using {}",
                value,
                limits.min,
                limits.max,
                safe
            );
        }
        safe
    }

    async fn dump(&self) -> String {
        let mut result = String::from("DISPLAY POWER MANAGER DUMP:\n");
        for (id, controller) in self.controllers.iter() {
            result.push_str(&format!(
                "Display Id={} State={} Reason={}",
                id,
                controller.get_state(),
                controller.get_reason()
            ));
            let brightness = controller.get_brightness().await;
            let levels = match controller.get_before_override_brightness() {
                Some(restore) => format!(" Brightness={} OverrideBrightness={}", restore, brightness),
                None => format!(" Brightness={}", brightness),
            };
            result.push_str(&levels);
            result.push_str(&format!(
                " Discount={} Boosted={} DeviceBrightness={}\n",
                controller.get_discount(),
                controller.is_boosted(),
                controller.get_device_brightness().await
            ));
        }
        result.push_str(&format!(
            "Brightness range: {}..={}, animation tick: {:?}\n",
            self.limits().min,
            self.limits().max,
            self.config.animation.tick()
        ));
        result
    }
}

#[async_trait]
impl<A: ScreenAction, S: BrightnessStore> Server<DisplayRequest, DisplayResponse>
    for DisplayPowerServer<A, S>
{
    fn get_name(&self) -> String {
        "DisplayPowerServer".to_owned()
    }

    async fn initialize(&mut self) -> Result<()> {
        let screen_action = self.provider.get_screen_action();
        let available = screen_action.get_display_ids().await?;
        for id in self.config.displays.ids.iter().copied() {
            if !available.contains(&id) {
                log::warn!("Display {} is configured, but not present, skipping it", id);
                continue;
            }
            let controller =
                ScreenController::new(id, &self.config, &self.provider, self.events.clone()).await;
            self.controllers.insert(id, controller);
        }
        if self.controllers.is_empty() {
            bail!(
                "None of the configured displays {:?} is present, found {:?}",
                self.config.displays.ids,
                available
            );
        }
        if !self.controllers.contains_key(&self.main_display) {
            let fallback = screen_action.get_default_display_id().await?;
            log::warn!(
                "Main display {} isn't controlled, using {} instead",
                self.main_display,
                fallback
            );
            self.main_display = fallback;
        }
        log::info!(
            "Controlling displays {:?}, main display {}",
            self.controllers.keys().collect::<Vec<_>>(),
            self.main_display
        );
        Ok(())
    }

    async fn handle_message(&mut self, payload: DisplayRequest) -> Result<DisplayResponse> {
        log::debug!("Handling {:?}", payload);
        let response = match payload {
            DisplayRequest::SetDisplayState {
                display,
                state,
                reason,
            } => DisplayResponse::Done(match self.controller(display) {
                Some(controller) => controller.update_state(state, reason).await,
                None => false,
            }),
            DisplayRequest::GetDisplayState(display) => {
                DisplayResponse::State(match self.controller(display) {
                    Some(controller) => controller.get_state(),
                    None => DisplayState::Unknown,
                })
            }
            DisplayRequest::GetDisplayIds => {
                DisplayResponse::DisplayIds(self.controllers.keys().copied().collect())
            }
            DisplayRequest::GetMainDisplayId => DisplayResponse::DisplayId(self.main_display),
            DisplayRequest::SetBrightness {
                display,
                value,
                gradual_duration,
            } => {
                let value = self.safe_brightness(value);
                DisplayResponse::Done(match self.controller(display) {
                    Some(controller) => controller.set_brightness(value, gradual_duration).await,
                    None => false,
                })
            }
            DisplayRequest::AdjustBrightness {
                display,
                value,
                duration,
            } => {
                let value = self.safe_brightness(value.max(0) as u32);
                DisplayResponse::Done(match self.controller(display) {
                    Some(controller) => controller.set_brightness(value, duration).await,
                    None => false,
                })
            }
            DisplayRequest::OverrideBrightness {
                display,
                value,
                gradual_duration,
            } => {
                let value = self.safe_brightness(value);
                DisplayResponse::Done(match self.controller(display) {
                    Some(controller) => {
                        controller
                            .override_brightness(value, gradual_duration)
                            .await
                    }
                    None => false,
                })
            }
            DisplayRequest::RestoreBrightness {
                display,
                gradual_duration,
            } => DisplayResponse::Done(match self.controller(display) {
                Some(controller) => controller.restore_brightness(gradual_duration).await,
                None => false,
            }),
            DisplayRequest::BoostBrightness {
                display,
                timeout,
                gradual_duration,
            } => DisplayResponse::Done(match self.controller(display) {
                Some(controller) => {
                    controller
                        .boost_brightness(timeout, gradual_duration)
                        .await
                }
                None => false,
            }),
            DisplayRequest::CancelBoostBrightness {
                display,
                gradual_duration,
            } => DisplayResponse::Done(match self.controller(display) {
                Some(controller) => controller.cancel_boost_brightness(gradual_duration).await,
                None => false,
            }),
            DisplayRequest::DiscountBrightness {
                display,
                discount,
                gradual_duration,
            } => DisplayResponse::Done(match self.controller(display) {
                Some(controller) => {
                    controller
                        .discount_brightness(discount, gradual_duration)
                        .await
                }
                None => false,
            }),
            DisplayRequest::GetBrightness(display) => {
                DisplayResponse::Brightness(match self.controller(display) {
                    Some(controller) => controller.get_brightness().await,
                    None => 0,
                })
            }
            DisplayRequest::GetDeviceBrightness(display) => {
                DisplayResponse::Brightness(match self.controller(display) {
                    Some(controller) => controller.get_device_brightness().await,
                    None => 0,
                })
            }
            DisplayRequest::IsScreenOn(display) => {
                DisplayResponse::Done(match self.controller(display) {
                    Some(controller) => controller.is_screen_on(),
                    None => false,
                })
            }
            DisplayRequest::RegisterObserver => DisplayResponse::Observer(self.events.subscribe()),
            DisplayRequest::Dump => DisplayResponse::Dump(self.dump().await),
        };
        Ok(response)
    }

    async fn tear_down(&mut self) -> Result<()> {
        for (id, controller) in std::mem::take(&mut self.controllers) {
            log::debug!("Shutting down display {}", id);
            controller.shutdown().await;
        }
        Ok(())
    }
}

/// Typed access to a [DisplayPowerServer] behind its port
#[derive(Clone)]
pub struct DisplayPowerClient {
    port: DisplayPowerPort,
}

impl DisplayPowerClient {
    pub fn new(port: DisplayPowerPort) -> DisplayPowerClient {
        DisplayPowerClient { port }
    }

    async fn request(&self, request: DisplayRequest) -> Result<DisplayResponse> {
        Ok(self.port.request(request).await?)
    }

    async fn request_done(&self, request: DisplayRequest) -> Result<bool> {
        match self.request(request).await? {
            DisplayResponse::Done(done) => Ok(done),
            other => bail!("Expected a success flag, got {:?}", other),
        }
    }

    async fn request_brightness(&self, request: DisplayRequest) -> Result<u32> {
        match self.request(request).await? {
            DisplayResponse::Brightness(value) => Ok(value),
            other => bail!("Expected a brightness, got {:?}", other),
        }
    }

    pub async fn set_display_state(&self, display: u32, state: DisplayState, reason: u32) -> Result<bool> {
        self.request_done(DisplayRequest::SetDisplayState {
            display,
            state,
            reason,
        })
        .await
    }

    pub async fn get_display_state(&self, display: u32) -> Result<DisplayState> {
        match self.request(DisplayRequest::GetDisplayState(display)).await? {
            DisplayResponse::State(state) => Ok(state),
            other => bail!("Expected a display state, got {:?}", other),
        }
    }

    pub async fn get_display_ids(&self) -> Result<Vec<u32>> {
        match self.request(DisplayRequest::GetDisplayIds).await? {
            DisplayResponse::DisplayIds(ids) => Ok(ids),
            other => bail!("Expected display ids, got {:?}", other),
        }
    }

    pub async fn get_main_display_id(&self) -> Result<u32> {
        match self.request(DisplayRequest::GetMainDisplayId).await? {
            DisplayResponse::DisplayId(id) => Ok(id),
            other => bail!("Expected a display id, got {:?}", other),
        }
    }

    pub async fn set_brightness(&self, display: u32, value: u32, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::SetBrightness {
            display,
            value,
            gradual_duration,
        })
        .await
    }

    pub async fn adjust_brightness(&self, display: u32, value: i32, duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::AdjustBrightness {
            display,
            value,
            duration,
        })
        .await
    }

    pub async fn override_brightness(&self, display: u32, value: u32, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::OverrideBrightness {
            display,
            value,
            gradual_duration,
        })
        .await
    }

    pub async fn restore_brightness(&self, display: u32, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::RestoreBrightness {
            display,
            gradual_duration,
        })
        .await
    }

    pub async fn boost_brightness(&self, display: u32, timeout: Duration, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::BoostBrightness {
            display,
            timeout,
            gradual_duration,
        })
        .await
    }

    pub async fn cancel_boost_brightness(&self, display: u32, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::CancelBoostBrightness {
            display,
            gradual_duration,
        })
        .await
    }

    pub async fn discount_brightness(&self, display: u32, discount: f64, gradual_duration: Duration) -> Result<bool> {
        self.request_done(DisplayRequest::DiscountBrightness {
            display,
            discount,
            gradual_duration,
        })
        .await
    }

    pub async fn get_brightness(&self, display: u32) -> Result<u32> {
        self.request_brightness(DisplayRequest::GetBrightness(display))
            .await
    }

    pub async fn get_device_brightness(&self, display: u32) -> Result<u32> {
        self.request_brightness(DisplayRequest::GetDeviceBrightness(display))
            .await
    }

    pub async fn is_screen_on(&self, display: u32) -> Result<bool> {
        self.request_done(DisplayRequest::IsScreenOn(display)).await
    }

    pub async fn register_observer(&self) -> Result<broadcast::Receiver<DisplayEvent>> {
        match self.request(DisplayRequest::RegisterObserver).await? {
            DisplayResponse::Observer(receiver) => Ok(receiver),
            other => bail!("Expected an observer, got {:?}", other),
        }
    }

    pub async fn dump(&self) -> Result<String> {
        match self.request(DisplayRequest::Dump).await? {
            DisplayResponse::Dump(dump) => Ok(dump),
            other => bail!("Expected a dump, got {:?}", other),
        }
    }

    /// Drops the client and waits until the server tore every display down
    pub async fn shutdown(self) {
        self.port.await_shutdown().await
    }
}
