use crate::config::CaptureConfig;
use crate::types::AudioChunk;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// マイクからのモノラル音声入力
///
/// デバイスが複数チャンネルの場合は平均してモノラルに変換する。
pub struct AudioInput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
}

impl AudioInput {
    /// 新しいAudioInputを作成
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if config.device_id == "default" {
            host.default_input_device()
                .context("デフォルト入力デバイスが見つかりません")?
        } else {
            Self::input_devices()?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(&config.device_id))
                .with_context(|| format!("デバイスが見つかりません: {}", config.device_id))?
        };

        log::info!("入力デバイス: {:?}", device.name());

        let default_config = device
            .default_input_config()
            .context("デフォルト入力設定が取得できません")?;

        log::debug!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config: stream_config,
            stream: None,
        })
    }

    /// 入力デバイスが1つでも使えるかどうか
    pub fn is_available() -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    /// ストリームを開始
    ///
    /// # Arguments
    /// * `sender` - モノラルのチャンクを受け取る送信チャンネル
    pub fn start(&mut self, sender: mpsc::Sender<AudioChunk>) -> Result<()> {
        let default_config = self.device.default_input_config()?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(sender)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(sender)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(sender)?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>(sender)?,
            _ => anyhow::bail!("サポートされていないサンプルフォーマット"),
        };

        stream.play().context("ストリームの再生開始に失敗")?;
        self.stream = Some(stream);

        log::debug!("音声入力ストリームを開始しました");

        Ok(())
    }

    /// ストリームを構築
    fn build_stream<T>(&self, sender: mpsc::Sender<AudioChunk>) -> Result<cpal::Stream>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let num_channels = self.config.channels.max(1) as usize;
        let sample_rate = self.config.sample_rate.0;

        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let timestamp_ns = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();

            // インターリーブされたデータをフレームごとに平均してモノラル化
            let samples: Vec<i16> = data
                .chunks(num_channels)
                .map(|frame| {
                    let sum: f32 = frame.iter().map(|s| s.to_float_sample().into()).sum();
                    let mean = (sum / frame.len() as f32).clamp(-1.0, 1.0);
                    (mean * i16::MAX as f32) as i16
                })
                .collect();

            let chunk = AudioChunk {
                samples,
                sample_rate,
                timestamp_ns,
            };

            match sender.try_send(chunk) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("音声チャンクの送信失敗: バッファ満杯");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // 受信側のターンが終わった後は捨てる
                }
            }
        };

        let error_callback = move |err| {
            log::error!("ストリームエラー: {}", err);
        };

        let stream = self
            .device
            .build_input_stream(&self.config, data_callback, error_callback, None)
            .context("入力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// ストリームを停止
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::debug!("音声入力ストリームを停止しました");
        }
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in Self::input_devices()?.into_iter().enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// 仮想デバイスなど、マイクとして使うべきでないデバイスを除外したデバイス一覧を取得
    fn input_devices() -> Result<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let excluded_names_regex =
            Regex::new("Background|Microsoft Teams|ZoomAudioDevice|Monitor of")
                .context("除外パターンのコンパイルに失敗")?;
        let devices = host
            .input_devices()?
            .filter(|device| match device.name() {
                Ok(name) => !excluded_names_regex.is_match(&name),
                Err(_) => true,
            })
            .collect();
        Ok(devices)
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}
