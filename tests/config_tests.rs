// Tests for configuration loading and the trigger cooldown gate.

use std::time::Duration;

use sotto::provider::ProviderKind;
use sotto::{Config, CooldownGate, Credentials};

#[test]
fn test_config_defaults_without_file() {
    let cfg = Config::load(None).unwrap();
    let session = cfg.session_config();

    assert_eq!(session.provider, ProviderKind::Deepgram);
    assert_eq!(session.constraints.sample_rate, 16000);
    assert_eq!(session.provider_config.commit_timeout, Duration::from_secs(5));
    assert_eq!(session.settle_delay, Duration::from_millis(250));
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sotto.toml");
    std::fs::write(
        &path,
        r#"
[provider]
stt = "elevenlabs"
language = "de"
commit_timeout_secs = 3

[audio]
echo_cancellation = false
noise_suppression = false

[refine]
enabled = false
"#,
    )
    .unwrap();

    let cfg = Config::load(path.to_str()).unwrap();
    let session = cfg.session_config();

    assert_eq!(session.provider, ProviderKind::Elevenlabs);
    assert_eq!(session.provider_config.language, "de");
    assert_eq!(session.provider_config.commit_timeout, Duration::from_secs(3));
    assert!(!session.constraints.echo_cancellation);
    assert!(!session.constraints.noise_suppression);
    assert!(!cfg.refine_config().enabled);
    // Unset sections keep their defaults.
    assert_eq!(session.constraints.sample_rate, 16000);
}

#[test]
fn test_per_provider_default_models() {
    let cfg = Config::load(None).unwrap();
    assert_eq!(cfg.session_config().provider_config.model, "nova-2");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sotto.toml");
    std::fs::write(&path, "[provider]\nstt = \"elevenlabs\"\n").unwrap();
    let cfg = Config::load(path.to_str()).unwrap();
    assert_eq!(cfg.session_config().provider_config.model, "scribe_v1");
}

#[test]
fn test_credentials_selected_by_provider() {
    let creds = Credentials {
        deepgram: Some("dg".into()),
        elevenlabs: None,
        refine: None,
    };

    assert_eq!(creds.for_provider(ProviderKind::Deepgram), Some("dg"));
    assert_eq!(creds.for_provider(ProviderKind::Elevenlabs), None);
}

#[test]
fn test_provider_kind_parses_from_config_strings() {
    assert_eq!("deepgram".parse::<ProviderKind>().unwrap(), ProviderKind::Deepgram);
    assert_eq!("ElevenLabs".parse::<ProviderKind>().unwrap(), ProviderKind::Elevenlabs);
    assert!("whisper".parse::<ProviderKind>().is_err());
}

#[test]
fn test_cooldown_gate_blocks_rapid_retrigger() {
    let mut gate = CooldownGate::new(Duration::from_millis(80));

    assert!(gate.try_fire());
    assert!(!gate.try_fire(), "re-trigger inside the window is swallowed");

    std::thread::sleep(Duration::from_millis(100));
    assert!(gate.try_fire(), "fires again once the window has passed");
}

#[test]
fn test_cooldown_gate_reset() {
    let mut gate = CooldownGate::new(Duration::from_secs(60));
    assert!(gate.try_fire());
    assert!(!gate.try_fire());

    gate.reset();
    assert!(gate.try_fire());
}
