use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_dvs-decay")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "dvs-decay.exe"
            } else {
                "dvs-decay"
            });
            p
        })
}

fn write_log(dir: &std::path::Path) -> PathBuf {
    let mut csv = String::from("timeStamp,xAddr,yAddr,polarity(0=OFF 1=ON)\n");
    // 20x10 sensor at 50 fps: one ON spark, then OFF events closing 5 frames.
    csv.push_str("1000,4,4,1\n");
    for k in 1..=5 {
        csv.push_str(&format!("{},0,0,0\n", 1000 + k * 20_000));
    }
    let path = dir.join("events.csv");
    std::fs::write(&path, csv).unwrap();
    path
}

const SENSOR_ARGS: [&str; 8] = [
    "--sensor-width",
    "20",
    "--sensor-height",
    "10",
    "--frame-rate",
    "50",
    "--decay-rate",
    "0.5",
];

#[test]
fn cli_frame_writes_png() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let log = write_log(&dir);
    let out_path = dir.join("frame1.png");
    let _ = std::fs::remove_file(&out_path);

    let status = std::process::Command::new(exe())
        .args(["frame", "--in"])
        .arg(&log)
        .args(["--frame", "1", "--out"])
        .arg(&out_path)
        .args(SENSOR_ARGS)
        .status()
        .unwrap();

    assert!(status.success());
    let img = image::open(&out_path).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (20, 10));
    // Flipped: raw (4, 4) lands on (15, 5).
    assert_ne!(img.get_pixel(15, 5).0, [0, 0, 0]);
    assert_eq!(img.get_pixel(4, 4).0, [0, 0, 0]);
}

#[test]
fn cli_frame_past_the_end_fails() {
    let dir = PathBuf::from("target").join("cli_smoke_past_end");
    std::fs::create_dir_all(&dir).unwrap();
    let log = write_log(&dir);

    let status = std::process::Command::new(exe())
        .args(["frame", "--in"])
        .arg(&log)
        .args(["--frame", "99", "--out"])
        .arg(dir.join("never.png"))
        .args(SENSOR_ARGS)
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn cli_render_writes_mp4_and_previews() {
    if !dvs_decay::is_ffmpeg_on_path() {
        return;
    }
    let dir = PathBuf::from("target").join("cli_smoke_render");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let log = write_log(&dir);
    let out_path = dir.join("out.mp4");
    let previews = dir.join("previews");

    let status = std::process::Command::new(exe())
        .args(["render", "--in"])
        .arg(&log)
        .arg("--out")
        .arg(&out_path)
        .args(["--width", "40", "--median-blur", "3", "--preview-every", "2"])
        .arg("--preview-dir")
        .arg(&previews)
        .args(SENSOR_ARGS)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(std::fs::metadata(&out_path).unwrap().len() > 0);
    let mut pngs: Vec<_> = std::fs::read_dir(&previews)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    pngs.sort();
    assert_eq!(
        pngs,
        vec!["frame_000000.png", "frame_000002.png", "frame_000004.png"]
    );
}
