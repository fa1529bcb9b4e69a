/// Build script that validates feature-flag / target-platform compatibility.
///
/// Currently checks that the `gpu-metal` feature is only enabled on Apple
/// platforms (macOS / iOS), since the underlying Objective-C framework crates
/// cannot compile elsewhere.
fn main() {
    // gpu-metal requires Apple platforms (macOS or iOS).
    // The mistralrs Metal backend pulls in Objective-C framework crates that
    // only compile on Apple targets.
    if std::env::var("CARGO_FEATURE_GPU_METAL").is_ok() {
        let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        if target_os != "macos" && target_os != "ios" {
            panic!(
                "The `gpu-metal` feature is only supported on macOS and iOS.\n\
                 Remove `gpu-metal` from your feature list when building for `{target_os}`."
            );
        }
    }
}
