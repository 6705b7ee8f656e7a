use std::path::Path;

use anyhow::Result;

use boxreel::AppConfig;

pub async fn cmd_probe(video: &Path, config: &AppConfig) -> Result<()> {
    let info = super::probe_video(video, config).await?;
    let (render_w, render_h) = info.render_size();

    println!("🎬 {}", video.display());
    println!("   Duration: {:.2}s", info.duration);
    println!("   Size: {}x{}", info.width, info.height);
    println!("   Frame rate: {:.3} fps", info.fps);
    println!("   Rotation: {}° ({})", info.rotation, info.orientation());
    println!("   Render size: {render_w}x{render_h}");
    println!("   Audio: {}", if info.has_audio { "yes" } else { "no" });

    Ok(())
}
