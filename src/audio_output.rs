use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

type SampleBuffer = Arc<Mutex<Vec<i16>>>;

/// 音声出力デバイスマネージャ
///
/// モノラルのi16サンプルを受け取り、デバイスのフォーマットに変換して再生する。
pub struct AudioOutput {
    device: Device,
    sample_rate: u32,
    stream: Option<Stream>,
    audio_tx: Option<mpsc::Sender<Vec<i16>>>,
    buffer: SampleBuffer,
}

impl AudioOutput {
    /// 新しいAudioOutputを作成
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("出力デバイス '{}' が見つかりません", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("デフォルト出力デバイスが見つかりません"))?
        };

        log::info!("出力デバイス: {}", device.name()?);

        Ok(Self {
            device,
            sample_rate,
            stream: None,
            audio_tx: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// 出力デバイスが1つでも使えるかどうか
    pub fn is_available() -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("利用可能な出力デバイス:");
        println!();

        for (idx, device) in host.output_devices()?.enumerate() {
            let name = device.name()?;
            let is_default = host
                .default_output_device()
                .and_then(|d| d.name().ok())
                .map(|default_name| default_name == name)
                .unwrap_or(false);

            let marker = if is_default { " (デフォルト)" } else { "" };
            println!("  [{}] {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "      サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    /// 音声ストリームを開始
    ///
    /// 既に開始済みなら同じ送信チャンネルを返す。
    pub fn start(&mut self) -> Result<mpsc::Sender<Vec<i16>>> {
        if let Some(tx) = &self.audio_tx {
            return Ok(tx.clone());
        }

        let default_config = self
            .device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        log::debug!(
            "出力ストリーム開始: {:?}, サンプルレート={}Hz",
            default_config.sample_format(),
            config.sample_rate.0
        );

        let (audio_tx, audio_rx) = mpsc::channel::<Vec<i16>>(64);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(config, audio_rx)?,
            SampleFormat::I16 => self.build_stream::<i16>(config, audio_rx)?,
            SampleFormat::U16 => self.build_stream::<u16>(config, audio_rx)?,
            _ => anyhow::bail!(
                "サポートされていないサンプルフォーマット: {:?}",
                default_config.sample_format()
            ),
        };

        stream.play().context("ストリームの再生開始に失敗")?;

        self.stream = Some(stream);
        self.audio_tx = Some(audio_tx.clone());

        Ok(audio_tx)
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(
        &self,
        config: StreamConfig,
        mut audio_rx: mpsc::Receiver<Vec<i16>>,
    ) -> Result<Stream>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let sample_buffer = self.buffer.clone();
        let receiver_buffer = self.buffer.clone();

        tokio::spawn(async move {
            while let Some(samples) = audio_rx.recv().await {
                let mut buffer = receiver_buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                buffer.extend_from_slice(&samples);
            }
        });

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = sample_buffer.lock().unwrap_or_else(PoisonError::into_inner);

                    // 足りない分は無音で埋める
                    let available = buffer.len().min(data.len());
                    for (slot, &sample) in data.iter_mut().zip(buffer.iter()) {
                        *slot = Self::convert_sample::<T>(sample);
                    }
                    for slot in data[available..].iter_mut() {
                        *slot = Sample::EQUILIBRIUM;
                    }
                    buffer.drain(..available);
                },
                move |err| {
                    log::error!("出力ストリームエラー: {}", err);
                },
                None,
            )
            .context("出力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// i16サンプルを指定されたフォーマットに変換
    fn convert_sample<T: Sample + FromSample<f32>>(sample: i16) -> T {
        let normalized = sample as f32 / i16::MAX as f32;
        T::from_sample(normalized)
    }

    /// 再生待ちのサンプルを捨てる
    pub fn clear(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 音声ストリームを停止
    pub fn stop(&mut self) {
        self.clear();
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::debug!("出力ストリームを停止しました");
        }
        self.audio_tx = None;
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
