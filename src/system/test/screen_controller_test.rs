use crate::{
    config::Config,
    external::{
        brightness_store::mock::MockBrightnessStore,
        dependency_provider::DependencyProvider,
        scheduler::tokio_scheduler::TokioScheduler,
        screen_action::{mock::MockScreenAction, DisplayState},
    },
    system::screen_controller::{DisplayEvent, ScreenController},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

type MockController = ScreenController<MockScreenAction, MockBrightnessStore>;

struct Fixture {
    controller: Arc<MockController>,
    screen: MockScreenAction,
    store: MockBrightnessStore,
    events: broadcast::Receiver<DisplayEvent>,
}

impl Fixture {
    fn drain_events(&mut self) -> Vec<DisplayEvent> {
        let mut events = vec![];
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn make_fixture_with_store(brightness: u32, store: MockBrightnessStore) -> Fixture {
    let mut config = Config::default();
    config.animation.tick_ms = 32;
    let screen = MockScreenAction::new(&[0], brightness);
    let provider = DependencyProvider::new(
        screen.clone(),
        store.clone(),
        Arc::new(TokioScheduler::new().unwrap()),
    );
    let (sender, events) = broadcast::channel(64);
    let controller = ScreenController::new(0, &config, &provider, sender).await;
    Fixture {
        controller,
        screen,
        store,
        events,
    }
}

async fn make_fixture(brightness: u32) -> Fixture {
    make_fixture_with_store(brightness, MockBrightnessStore::new()).await
}

const NOW: Duration = Duration::ZERO;

#[tokio::test]
async fn test_same_state_is_noop() {
    let fixture = make_fixture(120).await;
    assert_eq!(fixture.controller.get_state(), DisplayState::On);
    assert!(fixture.controller.update_state(DisplayState::On, 0).await);
    assert_eq!(fixture.screen.power_calls(), 0);
    assert!(fixture.screen.brightness_writes(0).is_empty());
}

#[tokio::test]
async fn test_initial_brightness() {
    let fixture = make_fixture(120).await;
    assert_eq!(fixture.controller.get_brightness().await, 120);
    // Cached after the first read
    fixture.screen.set_failure_mode(true);
    assert_eq!(fixture.controller.get_brightness().await, 120);
    assert_eq!(fixture.controller.get_device_brightness().await, 0);

    let persisted = make_fixture_with_store(120, MockBrightnessStore::with_value(90)).await;
    assert_eq!(persisted.controller.get_brightness().await, 90);
    assert_eq!(persisted.controller.get_device_brightness().await, 120);
}

#[tokio::test]
async fn test_set_brightness() {
    let mut fixture = make_fixture(120).await;
    assert!(fixture.controller.set_brightness(80, NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(80));
    assert_eq!(fixture.controller.get_brightness().await, 80);
    assert_eq!(fixture.store.stored(), Some(80));

    // Clamped into the device range
    assert!(fixture.controller.set_brightness(1000, NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(255));
    assert!(fixture.controller.set_brightness(0, NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(1));

    assert_eq!(
        fixture.drain_events(),
        vec![
            DisplayEvent::BrightnessChanged { display: 0, value: 80 },
            DisplayEvent::BrightnessChanged { display: 0, value: 255 },
            DisplayEvent::BrightnessChanged { display: 0, value: 1 },
        ]
    );
}

#[tokio::test]
async fn test_failed_write_keeps_cache() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.set_brightness(80, NOW).await);
    fixture.screen.set_failure_mode(true);
    assert!(!fixture.controller.set_brightness(30, NOW).await);
    assert_eq!(fixture.controller.get_brightness().await, 80);
    assert_eq!(fixture.store.stored(), Some(80));

    fixture.screen.set_failure_mode(false);
    assert_eq!(fixture.screen.brightness(0), Some(80));
}

#[tokio::test]
async fn test_override() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.override_brightness(200, NOW).await);
    assert!(fixture.controller.is_overridden());
    assert_eq!(fixture.screen.brightness(0), Some(200));

    assert!(!fixture.controller.set_brightness(50, NOW).await);
    assert_eq!(fixture.controller.get_brightness().await, 200);
    assert_eq!(fixture.screen.brightness(0), Some(200));

    // Overriding with the brightness from before ends the override
    assert!(fixture.controller.override_brightness(120, NOW).await);
    assert!(!fixture.controller.is_overridden());
    assert_eq!(fixture.screen.brightness(0), Some(120));

    assert!(fixture.controller.set_brightness(50, NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(50));
}

#[tokio::test]
async fn test_restore_brightness() {
    let fixture = make_fixture(120).await;
    assert!(!fixture.controller.restore_brightness(NOW).await);

    assert!(fixture.controller.override_brightness(30, NOW).await);
    assert!(fixture.controller.override_brightness(40, NOW).await);
    assert!(fixture.controller.is_overridden());
    assert_eq!(fixture.store.stored(), None);

    assert!(fixture.controller.restore_brightness(NOW).await);
    assert!(!fixture.controller.is_overridden());
    assert_eq!(fixture.screen.brightness(0), Some(120));
    assert_eq!(fixture.store.stored(), Some(120));
}

#[tokio::test(start_paused = true)]
async fn test_boost_expires() {
    let fixture = make_fixture(120).await;
    assert!(
        fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    assert!(fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(255));
    assert_eq!(fixture.controller.get_brightness().await, 120);
    assert_eq!(fixture.store.stored(), None);

    assert!(!fixture.controller.set_brightness(60, NOW).await);
    assert!(!fixture.controller.override_brightness(60, NOW).await);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(120));
    assert_eq!(fixture.screen.brightness_writes(0), vec![255, 120]);
}

#[tokio::test(start_paused = true)]
async fn test_boost_extension() {
    let fixture = make_fixture(120).await;
    let timeout = Duration::from_secs(1);
    assert!(fixture.controller.boost_brightness(timeout, NOW).await);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(fixture.controller.boost_brightness(timeout, NOW).await);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(255));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness_writes(0), vec![255, 120]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_boost() {
    let fixture = make_fixture(120).await;
    assert!(!fixture.controller.cancel_boost_brightness(NOW).await);
    assert!(
        !fixture
            .controller
            .boost_brightness(Duration::ZERO, NOW)
            .await
    );

    assert!(
        fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    assert!(fixture.controller.cancel_boost_brightness(NOW).await);
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(120));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fixture.screen.brightness_writes(0), vec![255, 120]);
}

#[tokio::test]
async fn test_override_blocks_boost() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.override_brightness(10, NOW).await);
    assert!(
        !fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(10));
}

#[tokio::test]
async fn test_failed_boost() {
    let fixture = make_fixture(120).await;
    assert_eq!(fixture.controller.get_brightness().await, 120);
    fixture.screen.set_failure_mode(true);
    assert!(
        !fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    assert!(!fixture.controller.is_boosted());
}

#[tokio::test]
async fn test_discount() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.set_brightness(200, NOW).await);
    assert!(fixture.controller.discount_brightness(0.5, NOW).await);
    assert_eq!(fixture.controller.get_discount(), 0.5);
    assert_eq!(fixture.screen.brightness(0), Some(100));
    assert_eq!(fixture.controller.get_brightness().await, 200);

    assert!(fixture.controller.set_brightness(99, NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(50));
    assert_eq!(fixture.store.stored(), Some(99));

    assert!(!fixture.controller.discount_brightness(0.0, NOW).await);
    assert!(!fixture.controller.discount_brightness(1.5, NOW).await);
    assert_eq!(fixture.controller.get_discount(), 0.5);

    // A gradual discount has nothing to animate and is written right away
    assert!(
        fixture
            .controller
            .discount_brightness(1.0, Duration::from_millis(320))
            .await
    );
    assert_eq!(fixture.screen.brightness(0), Some(99));
}

#[tokio::test(start_paused = true)]
async fn test_gradual_brightness() {
    let mut fixture = make_fixture(10).await;
    assert!(
        fixture
            .controller
            .set_brightness(100, Duration::from_millis(320))
            .await
    );
    assert!(fixture.controller.is_animating());
    assert_eq!(fixture.screen.brightness(0), Some(10));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!fixture.controller.is_animating());
    assert_eq!(
        fixture.screen.brightness_writes(0),
        vec![19, 28, 37, 46, 55, 64, 73, 82, 91, 100]
    );
    assert_eq!(fixture.controller.get_brightness().await, 100);
    assert_eq!(fixture.store.stored(), Some(100));

    let events = fixture.drain_events();
    assert_eq!(events.len(), 11);
    assert_eq!(
        events.last(),
        Some(&DisplayEvent::BrightnessSettled {
            display: 0,
            value: 100
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_new_request_supersedes_animation() {
    let fixture = make_fixture(10).await;
    assert!(
        fixture
            .controller
            .set_brightness(100, Duration::from_millis(320))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.screen.brightness_writes(0), vec![19, 28, 37]);

    assert!(fixture.controller.set_brightness(50, NOW).await);
    assert!(!fixture.controller.is_animating());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fixture.screen.brightness_writes(0), vec![19, 28, 37, 50]);
    assert_eq!(fixture.controller.get_brightness().await, 50);
    assert_eq!(fixture.store.stored(), Some(50));
}

#[tokio::test(start_paused = true)]
async fn test_gradual_boost_and_revert() {
    let fixture = make_fixture(200).await;
    assert!(
        fixture
            .controller
            .boost_brightness(Duration::from_secs(1), Duration::from_millis(64))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.screen.brightness(0), Some(255));
    assert_eq!(fixture.controller.get_brightness().await, 200);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fixture.screen.brightness(0), Some(200));
    assert_eq!(fixture.controller.get_brightness().await, 200);
    assert!(!fixture.controller.is_boosted());
}

#[tokio::test]
async fn test_off_and_on() {
    let mut fixture = make_fixture(120).await;
    assert!(fixture.controller.set_brightness(80, NOW).await);
    fixture.drain_events();

    assert!(fixture.controller.update_state(DisplayState::Off, 1).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::Off);
    assert_eq!(fixture.screen.power_state(0), Some(DisplayState::Off));
    assert!(!fixture.controller.is_screen_on());
    assert_eq!(
        fixture.drain_events(),
        vec![DisplayEvent::StateChanged {
            display: 0,
            state: DisplayState::Off,
            reason: 1
        }]
    );

    assert!(fixture.controller.update_state(DisplayState::On, 2).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::On);
    assert_eq!(fixture.controller.get_reason(), 2);
    assert_eq!(fixture.screen.brightness_writes(0), vec![80, 80]);
    assert_eq!(fixture.screen.power_calls(), 2);
}

#[tokio::test]
async fn test_on_restores_sane_brightness() {
    let fixture = make_fixture(0).await;
    assert!(fixture.controller.update_state(DisplayState::Off, 0).await);
    assert!(fixture.controller.update_state(DisplayState::On, 0).await);
    assert_eq!(fixture.screen.brightness(0), Some(102));
}

#[tokio::test]
async fn test_deferred_commit() {
    let fixture = make_fixture(120).await;
    fixture.screen.set_deferred_commits(true);
    assert!(fixture.controller.update_state(DisplayState::Off, 4).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::On);

    assert_eq!(fixture.screen.commit_pending(), 1);
    assert_eq!(fixture.controller.get_state(), DisplayState::Off);
    assert_eq!(fixture.controller.get_reason(), 4);
}

#[tokio::test]
async fn test_dim_and_suspend() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.update_state(DisplayState::Dim, 3).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::Dim);
    assert!(fixture.controller.is_screen_on());

    assert!(fixture.controller.update_state(DisplayState::Suspend, 3).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::Suspend);
    assert!(!fixture.controller.is_screen_on());

    fixture.screen.set_failure_mode(true);
    assert!(!fixture.controller.update_state(DisplayState::On, 0).await);
    assert!(!fixture.controller.update_state(DisplayState::Dim, 0).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::Suspend);

    assert!(!fixture.controller.update_state(DisplayState::Unknown, 0).await);
}

#[tokio::test]
async fn test_persistence_failure_is_not_fatal() {
    let fixture = make_fixture(120).await;
    fixture.store.set_failure_mode(true);
    assert!(fixture.controller.set_brightness(70, NOW).await);
    assert_eq!(fixture.controller.get_brightness().await, 70);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown() {
    let fixture = make_fixture(10).await;
    assert_eq!(fixture.controller.animation_tick(), Duration::from_millis(32));
    assert!(
        fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    fixture.controller.shutdown().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness_writes(0), vec![255]);

    let animated = make_fixture(10).await;
    assert!(
        animated
            .controller
            .set_brightness(100, Duration::from_millis(320))
            .await
    );
    tokio::time::sleep(Duration::from_millis(40)).await;
    animated.controller.shutdown().await;
    assert!(!animated.controller.is_animating());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(animated.screen.brightness_writes(0), vec![19]);
}

#[tokio::test]
async fn test_brightness_refused_while_off() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.update_state(DisplayState::Off, 0).await);

    assert!(!fixture.controller.set_brightness(60, NOW).await);
    assert!(!fixture.controller.override_brightness(60, NOW).await);
    assert!(
        !fixture
            .controller
            .boost_brightness(Duration::from_secs(1), NOW)
            .await
    );
    assert!(!fixture.controller.discount_brightness(0.5, NOW).await);
    assert!(!fixture.controller.is_overridden());
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.controller.get_discount(), 1.0);
    assert!(fixture.screen.brightness_writes(0).is_empty());

    assert!(fixture.controller.update_state(DisplayState::On, 0).await);
    assert!(fixture.controller.set_brightness(60, NOW).await);
    assert_eq!(fixture.screen.brightness_writes(0), vec![120, 60]);
}

#[tokio::test]
async fn test_dim_while_off_is_ignored() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.update_state(DisplayState::Off, 2).await);
    assert!(fixture.controller.update_state(DisplayState::Dim, 3).await);
    assert_eq!(fixture.controller.get_state(), DisplayState::Off);
    assert_eq!(fixture.controller.get_reason(), 2);
    assert_eq!(fixture.screen.power_state(0), Some(DisplayState::Off));
    assert_eq!(fixture.screen.power_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_boost_survives_off_and_on() {
    let fixture = make_fixture(120).await;
    assert!(
        fixture
            .controller
            .boost_brightness(Duration::from_secs(10), NOW)
            .await
    );
    assert!(fixture.controller.update_state(DisplayState::Off, 0).await);
    assert!(fixture.controller.update_state(DisplayState::On, 0).await);

    assert_eq!(fixture.screen.brightness(0), Some(255));
    assert!(fixture.controller.is_boosted());
    assert_eq!(fixture.controller.get_brightness().await, 120);
    assert_eq!(fixture.store.stored(), None);
    assert_eq!(fixture.screen.brightness_writes(0), vec![255, 255]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!fixture.controller.is_boosted());
    assert_eq!(fixture.screen.brightness(0), Some(120));
}

#[tokio::test]
async fn test_override_survives_off_and_on() {
    let fixture = make_fixture(120).await;
    assert!(fixture.controller.override_brightness(40, NOW).await);
    assert!(fixture.controller.update_state(DisplayState::Off, 0).await);
    assert!(fixture.controller.update_state(DisplayState::On, 0).await);

    assert_eq!(fixture.screen.brightness(0), Some(40));
    assert!(fixture.controller.is_overridden());
    assert_eq!(fixture.controller.get_before_override_brightness(), Some(120));
    assert_eq!(fixture.store.stored(), None);
    assert_eq!(fixture.screen.brightness_writes(0), vec![40, 40]);

    assert!(fixture.controller.restore_brightness(NOW).await);
    assert_eq!(fixture.screen.brightness(0), Some(120));
}

#[tokio::test(start_paused = true)]
async fn test_off_stops_animation() {
    let fixture = make_fixture(10).await;
    assert!(
        fixture
            .controller
            .set_brightness(100, Duration::from_millis(320))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.screen.brightness_writes(0), vec![19, 28, 37]);

    assert!(fixture.controller.update_state(DisplayState::Off, 0).await);
    assert!(!fixture.controller.is_animating());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fixture.screen.brightness_writes(0), vec![19, 28, 37]);
    assert_eq!(fixture.store.stored(), Some(37));

    assert!(fixture.controller.update_state(DisplayState::On, 0).await);
    assert_eq!(fixture.screen.brightness(0), Some(37));
    assert_eq!(fixture.screen.brightness_writes(0), vec![19, 28, 37, 37]);
}
