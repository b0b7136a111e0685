use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::camera::Camera;
use crate::convert::{self, PixelFormat};
use crate::coordinator::Shared;
use crate::rtp::{self, Destination};
use crate::wire::nal::scan_nals;

const FPS_LOG_INTERVAL: u32 = 30;

pub async fn run(shared: Arc<Shared>) {
    let frame_interval = shared.config.frame_interval;
    let mut frame_count: u32 = 0;
    let mut window_start = Instant::now();
    let mut encode_time_total = Duration::ZERO;
    let mut rtp_scratch = Vec::with_capacity(rtp::SCRATCH_BUFFER_LEN);

    loop {
        if !shared.streaming_active.load(Ordering::SeqCst) {
            break;
        }

        let tick_start = Instant::now();

        if let Err(()) = run_one_frame(&shared, frame_count, &mut encode_time_total, &mut rtp_scratch).await {
            tokio::time::sleep(frame_interval).await;
            continue;
        }

        frame_count = frame_count.wrapping_add(1);
        shared.frame_count.store(frame_count, Ordering::Relaxed);

        if frame_count % FPS_LOG_INTERVAL == 0 {
            let elapsed = window_start.elapsed();
            let measured_fps = FPS_LOG_INTERVAL as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            let avg_encode_ms = encode_time_total.as_secs_f64() * 1000.0 / FPS_LOG_INTERVAL as f64;
            info!("media: {measured_fps:.1} fps, avg encode {avg_encode_ms:.2} ms");
            window_start = Instant::now();
            encode_time_total = Duration::ZERO;
        }

        let elapsed_tick = tick_start.elapsed();
        if elapsed_tick < frame_interval {
            tokio::time::sleep(frame_interval - elapsed_tick).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

async fn run_one_frame(
    shared: &Arc<Shared>,
    frame_count: u32,
    encode_time_total: &mut Duration,
    rtp_scratch: &mut Vec<u8>,
) -> Result<(), ()> {
    // Lock order matches `Shared::ensure_encoder`/`prime_parameter_sets`
    // (encoder, then camera) so the two sides of the encoder/camera pair
    // never deadlock against each other.
    let mut encoder_guard = shared.encoder.lock().await;
    let Some(encoder) = encoder_guard.as_mut() else {
        return Err(());
    };

    let mut camera = shared.camera.lock().await;
    if !camera.capture_frame() {
        return Err(());
    }

    let width = camera.get_image_width();
    let height = camera.get_image_height();
    let format = camera.pixel_format();

    let convert_result = match format {
        PixelFormat::Rgb565 => {
            convert::rgb565_to_yuv420(&shared.yuv_lut, camera.get_image_data(), encoder.yuv_buffer_mut(), width, height)
        }
        PixelFormat::Yuyv => convert::yuyv_to_yuv420(camera.get_image_data(), encoder.yuv_buffer_mut(), width, height),
    };
    drop(camera);

    if let Err(e) = convert_result {
        warn!("media: frame conversion failed: {e}");
        return Err(());
    }

    let fps = encoder.config().fps.max(1);

    let encode_start = Instant::now();
    let encode_result = encoder.encode_frame(frame_count);
    *encode_time_total += encode_start.elapsed();

    let bitstream = match encode_result {
        Ok((data, _frame_type)) => data,
        Err(e) => {
            warn!("media: encode failed, dropping frame: {e}");
            return Err(());
        }
    };

    let nals = scan_nals(bitstream);
    if nals.is_empty() {
        return Err(());
    }

    let destinations: Vec<Destination> = {
        let sessions = shared.sessions.lock().unwrap();
        sessions
            .playing_destinations()
            .into_iter()
            .map(|(addr, port)| Destination {
                addr: SocketAddr::new(IpAddr::V4(addr), port),
            })
            .collect()
    };

    let last_index = nals.len() - 1;
    for (i, nal) in nals.iter().enumerate() {
        rtp::send_nal(
            &shared.rtp_socket,
            &shared.rtp_counters,
            nal,
            i == last_index,
            &destinations,
            rtp_scratch,
        )
        .await;
    }

    shared.rtp_counters.advance_timestamp(90_000 / fps);

    Ok(())
}
