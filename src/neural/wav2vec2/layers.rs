//! wav2vec2 network modules
//!
//! Covers both checkpoint families: post-norm encoders with a group-norm
//! feature encoder (base) and pre-norm "stable layer norm" encoders with a
//! layer-norm feature encoder (large-lv60, XLS-R).

use candle_core::{Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Linear, VarBuilder};

use super::config::{FeatExtractNorm, Wav2Vec2ModelConfig};

/// GroupNorm in the feature encoder uses the framework default
const GROUP_NORM_EPS: f64 = 1e-5;

// ── Normalisation ───────────────────────────────────────────────────────────
// Written with basic tensor ops so every backend has kernels for it.

struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get(size, "weight")?,
            bias: vb.get(size, "bias")?,
            eps,
        })
    }

    /// Normalise over the last dimension
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// GroupNorm with one group per channel, on `(batch, channels, time)`
struct ChannelGroupNorm {
    weight: Tensor,
    bias: Tensor,
}

impl ChannelGroupNorm {
    fn load(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get(channels, "weight")?.reshape((1, channels, 1))?,
            bias: vb.get(channels, "bias")?.reshape((1, channels, 1))?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + GROUP_NORM_EPS)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

// ── Feature encoder (strided conv stack) ────────────────────────────────────

enum ConvNorm {
    None,
    Layer(LayerNorm),
    Group(ChannelGroupNorm),
}

struct ConvLayer {
    conv: Conv1d,
    norm: ConvNorm,
}

impl ConvLayer {
    fn load(cfg: &Wav2Vec2ModelConfig, i: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let in_c = if i == 0 { 1 } else { cfg.conv_dim[i - 1] };
        let out_c = cfg.conv_dim[i];
        let conv_cfg = Conv1dConfig {
            stride: cfg.conv_stride[i],
            ..Default::default()
        };
        let conv = if cfg.conv_bias {
            candle_nn::conv1d(in_c, out_c, cfg.conv_kernel[i], conv_cfg, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(in_c, out_c, cfg.conv_kernel[i], conv_cfg, vb.pp("conv"))?
        };
        let norm = match cfg.feat_extract_norm {
            FeatExtractNorm::Layer => ConvNorm::Layer(LayerNorm::load(
                out_c,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            FeatExtractNorm::Group if i == 0 => {
                ConvNorm::Group(ChannelGroupNorm::load(out_c, vb.pp("layer_norm"))?)
            }
            FeatExtractNorm::Group => ConvNorm::None,
        };
        Ok(Self { conv, norm })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            ConvNorm::None => xs,
            ConvNorm::Layer(ln) => ln
                .forward(&xs.transpose(1, 2)?.contiguous()?)?
                .transpose(1, 2)?
                .contiguous()?,
            ConvNorm::Group(gn) => gn.forward(&xs)?,
        };
        xs.gelu_erf()
    }
}

struct FeatureEncoder {
    layers: Vec<ConvLayer>,
}

impl FeatureEncoder {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers = (0..cfg.conv_dim.len())
            .map(|i| ConvLayer::load(cfg, i, vb.pp(format!("conv_layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        Ok(h)
    }
}

// ── Feature projection ──────────────────────────────────────────────────────

struct FeatureProjection {
    layer_norm: LayerNorm,
    projection: Linear,
}

impl FeatureProjection {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim = cfg.conv_dim[cfg.conv_dim.len() - 1];
        Ok(Self {
            layer_norm: LayerNorm::load(dim, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            projection: candle_nn::linear(dim, cfg.hidden_size, vb.pp("projection"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.projection.forward(&self.layer_norm.forward(xs)?)
    }
}

// ── Positional conv embedding ───────────────────────────────────────────────

/// Rebuild a weight-normalised conv kernel (norm over all dims but the last)
fn load_weight_norm_conv(
    in_c: usize,
    out_c: usize,
    kernel: usize,
    cfg: Conv1dConfig,
    vb: VarBuilder,
) -> candle_core::Result<Conv1d> {
    let per_group = in_c / cfg.groups;
    let (g_name, v_name) = if vb.contains_tensor("parametrizations.weight.original0") {
        (
            "parametrizations.weight.original0",
            "parametrizations.weight.original1",
        )
    } else {
        ("weight_g", "weight_v")
    };

    let weight = if vb.contains_tensor(v_name) {
        let v = vb.get((out_c, per_group, kernel), v_name)?;
        let g = vb.get((1, 1, kernel), g_name)?;
        let norm = v.sqr()?.sum_keepdim(0)?.sum_keepdim(1)?.sqrt()?;
        v.broadcast_div(&norm)?.broadcast_mul(&g)?
    } else {
        vb.get((out_c, per_group, kernel), "weight")?
    };

    let bias = vb.get(out_c, "bias")?;
    Ok(Conv1d::new(weight, Some(bias), cfg))
}

struct PosConvEmbed {
    conv: Conv1d,
}

impl PosConvEmbed {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: cfg.num_conv_pos_embeddings / 2,
            groups: cfg.num_conv_pos_embedding_groups,
            ..Default::default()
        };
        Ok(Self {
            conv: load_weight_norm_conv(
                cfg.hidden_size,
                cfg.hidden_size,
                cfg.num_conv_pos_embeddings,
                conv_cfg,
                vb.pp("conv"),
            )?,
        })
    }

    /// `(batch, time, hidden)` in and out; even kernels drop the extra frame
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let h = self.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
        h.narrow(2, 0, seq_len)?
            .gelu_erf()?
            .transpose(1, 2)?
            .contiguous()
    }
}

// ── Transformer blocks ──────────────────────────────────────────────────────

struct SelfAttention {
    q: Linear,
    k: Linear,
    v: Linear,
    out: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl SelfAttention {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let h = cfg.hidden_size;
        let head_dim = h / cfg.num_attention_heads;
        Ok(Self {
            q: candle_nn::linear(h, h, vb.pp("q_proj"))?,
            k: candle_nn::linear(h, h, vb.pp("k_proj"))?,
            v: candle_nn::linear(h, h, vb.pp("v_proj"))?,
            out: candle_nn::linear(h, h, vb.pp("out_proj"))?,
            num_heads: cfg.num_attention_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        let split = |x: Tensor| {
            x.reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = split((self.q.forward(xs)? * self.scale)?)?;
        let k = split(self.k.forward(xs)?)?;
        let v = split(self.v.forward(xs)?)?;

        let attn = candle_nn::ops::softmax(
            &q.matmul(&k.transpose(2, 3)?.contiguous()?)?,
            D::Minus1,
        )?;
        let out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        self.out.forward(&out)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate_dense"),
            )?,
            down: candle_nn::linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                vb.pp("output_dense"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.down.forward(&self.up.forward(xs)?.gelu_erf()?)
    }
}

struct EncoderLayer {
    attn: SelfAttention,
    layer_norm: LayerNorm,
    ff: FeedForward,
    final_layer_norm: LayerNorm,
    pre_norm: bool,
}

impl EncoderLayer {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            attn: SelfAttention::load(cfg, vb.pp("attention"))?,
            layer_norm: LayerNorm::load(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            ff: FeedForward::load(cfg, vb.pp("feed_forward"))?,
            final_layer_norm: LayerNorm::load(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if self.pre_norm {
            let h = (xs + self.attn.forward(&self.layer_norm.forward(xs)?)?)?;
            &h + self.ff.forward(&self.final_layer_norm.forward(&h)?)?
        } else {
            let h = self.layer_norm.forward(&(xs + self.attn.forward(xs)?)?)?;
            self.final_layer_norm.forward(&(&h + self.ff.forward(&h)?)?)
        }
    }
}

struct Encoder {
    pos_conv: PosConvEmbed,
    layer_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    pre_norm: bool,
}

impl Encoder {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| EncoderLayer::load(cfg, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            pos_conv: PosConvEmbed::load(cfg, vb.pp("pos_conv_embed"))?,
            layer_norm: LayerNorm::load(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            layers,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    /// Every hidden state, embedding first, `num_hidden_layers + 1` in total
    ///
    /// Pre-norm encoders record each layer's input and then the final
    /// layer-normed output; post-norm encoders normalise the embedding first
    /// and record each layer's output.
    fn hidden_states(&self, xs: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let mut h = (xs + self.pos_conv.forward(xs)?)?;
        let mut states = Vec::with_capacity(self.layers.len() + 1);

        if self.pre_norm {
            for layer in &self.layers {
                let next = layer.forward(&h)?;
                states.push(h);
                h = next;
            }
            states.push(self.layer_norm.forward(&h)?);
        } else {
            h = self.layer_norm.forward(&h)?;
            for layer in &self.layers {
                let next = layer.forward(&h)?;
                states.push(h);
                h = next;
            }
            states.push(h);
        }

        Ok(states)
    }
}

// ── Full model ──────────────────────────────────────────────────────────────

/// wav2vec2 without any task head
pub(crate) struct Wav2Vec2Model {
    feature_encoder: FeatureEncoder,
    feature_projection: FeatureProjection,
    encoder: Encoder,
}

impl Wav2Vec2Model {
    /// Load from a var builder rooted at the model (prefix already applied)
    pub(crate) fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            feature_encoder: FeatureEncoder::load(cfg, vb.pp("feature_extractor"))?,
            feature_projection: FeatureProjection::load(cfg, vb.pp("feature_projection"))?,
            encoder: Encoder::load(cfg, vb.pp("encoder"))?,
        })
    }

    /// `(batch, samples)` audio to per-layer `(batch, frames, hidden)` states
    pub(crate) fn hidden_states(&self, audio: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let h = self.feature_encoder.forward(&audio.unsqueeze(1)?)?;
        let h = self
            .feature_projection
            .forward(&h.transpose(1, 2)?.contiguous()?)?;
        self.encoder.hidden_states(&h)
    }
}
