use bevy::prelude::*;

fn main() -> anyhow::Result<()> {
    App::new()
        .add_plugins(MinimalPlugins)
        .add_plugins(bevy::log::LogPlugin::default())
        .add_plugins(bevy::state::app::StatesPlugin)
        .add_plugins(bevy::asset::AssetPlugin::default())
        .add_plugins(server::ServerPlugin::default())
        .run();
    Ok(())
}
