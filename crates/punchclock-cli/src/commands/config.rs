use std::env;

use punchclock_core::config::{normalize_base_url, ENV_API_URL, ENV_DEVICE_ID};

use crate::cli::ConfigCommands;
use crate::config_profiles::{normalize_profile_name, normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_base_url,
            device_id,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            api_base_url,
            device_id,
            no_activate,
        ),
        ConfigCommands::Show { json } => run_config_show(json, global_profile),
        ConfigCommands::Use { name } => run_config_use(&name),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_base_url: Option<String>,
    device_id: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    // Explicit flags first, then the environment, then what the profile had.
    let api_base_url = normalize_text_option(api_base_url)
        .or_else(|| normalize_text_option(env::var(ENV_API_URL).ok()));
    let device_id =
        normalize_text_option(device_id).or_else(|| normalize_text_option(env::var(ENV_DEVICE_ID).ok()));
    init_profile(
        &mut config,
        &profile_name,
        api_base_url,
        device_id,
        !no_activate,
    )?;

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let ready = config
        .profile(&profile_name)
        .is_some_and(|profile| profile.api_base_url.is_some());
    if ready {
        println!("Profile '{profile_name}' is ready. Run `punchclock sync` to fetch reference data.");
    } else {
        println!("Profile '{profile_name}' is missing: api_base_url");
    }
    Ok(())
}

pub fn init_profile(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    api_base_url: Option<String>,
    device_id: Option<String>,
    activate: bool,
) -> Result<(), CliError> {
    let api_base_url = api_base_url.map(normalize_base_url).transpose()?;

    let profile = config.profile_mut_or_default(profile_name);
    if let Some(url) = api_base_url {
        profile.api_base_url = Some(url);
    }
    if let Some(device_id) = normalize_text_option(device_id) {
        profile.device_id = Some(device_id);
    }

    if activate {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(())
}

pub fn run_config_show(as_json: bool, global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if config.profiles.is_empty() {
        println!("No profiles configured. Run `punchclock config init --api-base-url <URL>`.");
        return Ok(());
    }

    let selected = config.resolve_profile_name(global_profile);
    for (name, profile) in &config.profiles {
        let marker = if *name == selected { "*" } else { " " };
        println!(
            "{marker} {name:<12}  server={}  device={}",
            profile.api_base_url.as_deref().unwrap_or("-"),
            profile.device_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn run_config_use(name: &str) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let name = activate_profile(&mut config, name)?;
    config.save().map_err(CliError::Config)?;
    println!("Active profile: {name}");
    Ok(())
}

pub fn activate_profile(config: &mut CliProfilesConfig, name: &str) -> Result<String, CliError> {
    let name = normalize_profile_name(Some(name))
        .ok_or_else(|| CliError::Config("profile name must not be empty".to_string()))?;
    if config.profile(&name).is_none() {
        return Err(CliError::UnknownProfile(name));
    }
    config.active_profile = Some(name.clone());
    Ok(name)
}
