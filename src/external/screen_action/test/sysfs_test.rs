use super::super::sysfs::{read_number_from_file, SysfsScreenAction};
use crate::external::screen_action::{DisplayState, ScreenAction};
use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::oneshot;

static BACKLIGHT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Lays out a fake backlight class directory with a single device
fn fake_backlight(max_brightness: u32, brightness: u32) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "lucerna-backlight-{}-{}",
        std::process::id(),
        BACKLIGHT_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let device = root.join("panel");
    std::fs::create_dir_all(&device).unwrap();
    std::fs::write(device.join("max_brightness"), format!("{}\n", max_brightness)).unwrap();
    std::fs::write(device.join("brightness"), format!("{}\n", brightness)).unwrap();
    std::fs::write(device.join("bl_power"), "0\n").unwrap();
    root
}

#[tokio::test]
async fn test_brightness_scaling() {
    let root = fake_backlight(1000, 500);
    let action = SysfsScreenAction::new(&root, "panel", 255).await.unwrap();
    assert_eq!(action.get_brightness(0).await.unwrap(), 128);
    action.set_brightness(0, 255).await.unwrap();
    assert_eq!(
        read_number_from_file(root.join("panel/brightness")).await.unwrap(),
        1000
    );
    action.set_brightness(0, 51).await.unwrap();
    assert_eq!(
        read_number_from_file(root.join("panel/brightness")).await.unwrap(),
        200
    );
    assert!(action.set_brightness(0, 256).await.is_err());
    assert!(action.set_brightness(1, 10).await.is_err());
    std::fs::remove_dir_all(root).unwrap();
}

#[tokio::test]
async fn test_power_states() {
    let root = fake_backlight(100, 50);
    let action = SysfsScreenAction::new(&root, "panel", 255).await.unwrap();
    assert_eq!(action.get_power_state(0).await.unwrap(), DisplayState::On);
    action
        .set_power_state(0, DisplayState::Dim, 0)
        .await
        .unwrap();
    assert_eq!(action.get_power_state(0).await.unwrap(), DisplayState::Dim);

    let (committed_sender, committed_receiver) = oneshot::channel();
    action
        .set_power_state_async(
            0,
            DisplayState::Off,
            0,
            Box::new(move |state| {
                let _ = committed_sender.send(state);
            }),
        )
        .await
        .unwrap();
    let committed = tokio::time::timeout(Duration::from_secs(5), committed_receiver)
        .await
        .expect("Power change never committed")
        .unwrap();
    assert_eq!(committed, DisplayState::Off);
    assert_eq!(action.get_power_state(0).await.unwrap(), DisplayState::Off);
    assert_eq!(
        read_number_from_file(root.join("panel/bl_power")).await.unwrap(),
        4
    );
    std::fs::remove_dir_all(root).unwrap();
}

#[tokio::test]
async fn test_missing_device() {
    let root = fake_backlight(100, 50);
    assert!(SysfsScreenAction::new(&root, "nonexistent", 255)
        .await
        .is_err());
    std::fs::remove_dir_all(root).unwrap();
}
