// ABOUTME: Build script for compile-time platform validation
// ABOUTME: Warns when the build has no platform adapter compiled in

fn main() {
    // Warn if no platform features are enabled
    let has_discord = cfg!(feature = "discord");

    if !has_discord {
        println!(
            "cargo::warning=No platform features enabled. \
             The library builds headless; enable `discord` for the bot binary."
        );
    }
}
