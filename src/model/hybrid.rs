//! Hybrid convolution + attention classifier
//!
//! A residual convolutional stem extracts a feature map, which is cut into
//! patches and fed as a token sequence through pre-norm transformer encoder
//! blocks. Tokens are mean pooled into a linear head.
//!
//! ```text
//! [B, 3, 32, 32]
//!   -> stem conv + residual stages   [B, C, 8, 8]   (n_blocks = [2, 2, 1])
//!   -> patch embedding               [B, N, D]
//!   -> + position embedding
//!   -> depth x encoder block         [B, N, D]
//!   -> layer norm, mean over tokens  [B, D]
//!   -> linear head                   [B, num_classes]
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{gelu, relu},
        backend::Backend,
        Int, Tensor,
    },
};

use super::resnet::Projection;
use super::ImageClassifier;
use crate::utils::error::{self, TrainError};

const STEM_CHANNELS: usize = 64;

/// Configuration for [`HybridNet`]
#[derive(Config, Debug)]
pub struct HybridNetConfig {
    /// Number of output classes
    #[config(default = "10")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "32")]
    pub image_size: usize,

    /// Residual blocks per convolutional stage; every stage after the first halves resolution
    #[config(default = "vec![2, 2, 1]")]
    pub n_blocks: Vec<usize>,

    /// Side of the square patches cut from the feature map
    #[config(default = "1")]
    pub patch_size: usize,

    /// Number of transformer encoder blocks
    #[config(default = "4")]
    pub depth: usize,

    /// Attention heads per encoder block
    #[config(default = "8")]
    pub heads: usize,

    /// Token width
    #[config(default = "256")]
    pub embed_dim: usize,

    /// Hidden width of the encoder MLP relative to embed_dim
    #[config(default = "4")]
    pub mlp_ratio: usize,

    #[config(default = "0.1")]
    pub dropout: f64,
}

impl HybridNetConfig {
    /// Channels of each convolutional stage
    pub fn stage_channels(&self) -> Vec<usize> {
        (0..self.n_blocks.len())
            .map(|i| STEM_CHANNELS << i)
            .collect()
    }

    /// Side of the feature map leaving the convolutional stages
    pub fn feature_size(&self) -> usize {
        self.image_size >> self.n_blocks.len().saturating_sub(1)
    }

    /// Tokens per image
    pub fn num_patches(&self) -> usize {
        let side = self.feature_size() / self.patch_size.max(1);
        side * side
    }

    pub fn validate(&self) -> error::Result<()> {
        let fail = |msg: String| Err(TrainError::Config(msg));

        if self.n_blocks.is_empty() {
            return fail("n_blocks must name at least one stage".into());
        }
        if self.n_blocks.contains(&0) {
            return fail(format!("every stage needs a block, got {:?}", self.n_blocks));
        }
        if self.depth == 0 {
            return fail("attention depth must be positive".into());
        }
        if self.heads == 0 {
            return fail("attention heads must be positive".into());
        }
        if self.embed_dim % self.heads != 0 {
            return fail(format!(
                "embed_dim {} is not divisible by {} heads",
                self.embed_dim, self.heads
            ));
        }
        if self.num_classes == 0 || self.mlp_ratio == 0 {
            return fail("num_classes and mlp_ratio must be positive".into());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout must be in [0, 1), got {}", self.dropout));
        }

        let downsample = 1usize << (self.n_blocks.len() - 1);
        if self.image_size % downsample != 0 {
            return fail(format!(
                "image size {} does not survive {} stride-2 stages",
                self.image_size,
                self.n_blocks.len() - 1
            ));
        }
        let feature_size = self.feature_size();
        if self.patch_size == 0 || feature_size % self.patch_size != 0 {
            return fail(format!(
                "patch size {} does not divide the {feature_size}x{feature_size} feature map",
                self.patch_size
            ));
        }

        Ok(())
    }

    /// Build the network on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<HybridNet<B>> {
        self.validate()?;

        let channels = self.stage_channels();
        let mut in_planes = STEM_CHANNELS;
        let mut blocks: Vec<BasicBlock<B>> = Vec::new();
        for (stage, (&count, &planes)) in self.n_blocks.iter().zip(channels.iter()).enumerate() {
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(in_planes, planes, stride, device));
                in_planes = planes;
            }
        }

        let encoders: Vec<EncoderBlock<B>> = (0..self.depth)
            .map(|_| {
                EncoderBlockConfig {
                    d_model: self.embed_dim,
                    heads: self.heads,
                    d_ff: self.embed_dim * self.mlp_ratio,
                    dropout: self.dropout,
                }
                .init(device)
            })
            .collect();

        Ok(HybridNet {
            stem: Conv2dConfig::new([3, STEM_CHANNELS], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            stem_bn: BatchNormConfig::new(STEM_CHANNELS).init(device),
            blocks,
            patch_embed: Conv2dConfig::new(
                [in_planes, self.embed_dim],
                [self.patch_size, self.patch_size],
            )
            .with_stride([self.patch_size, self.patch_size])
            .init(device),
            position_embedding: EmbeddingConfig::new(self.num_patches(), self.embed_dim)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            encoders,
            norm: LayerNormConfig::new(self.embed_dim).init(device),
            head: LinearConfig::new(self.embed_dim, self.num_classes).init(device),
            num_classes: self.num_classes,
        })
    }
}

/// 3x3 -> 3x3 residual block
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_planes: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let conv3x3 = |cin: usize, cout: usize, stride: usize| {
            Conv2dConfig::new([cin, cout], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        };

        Self {
            conv1: conv3x3(in_planes, planes, stride),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv3x3(planes, planes, 1),
            bn2: BatchNormConfig::new(planes).init(device),
            shortcut: (stride != 1 || in_planes != planes)
                .then(|| Projection::new(in_planes, planes, stride, device)),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));

        relu(out + identity)
    }
}

struct EncoderBlockConfig {
    d_model: usize,
    heads: usize,
    d_ff: usize,
    dropout: f64,
}

impl EncoderBlockConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        EncoderBlock {
            attention: MultiHeadAttentionConfig::new(self.d_model, self.heads)
                .with_dropout(self.dropout)
                .init(device),
            mlp_in: LinearConfig::new(self.d_model, self.d_ff).init(device),
            mlp_out: LinearConfig::new(self.d_ff, self.d_model).init(device),
            norm1: LayerNormConfig::new(self.d_model).init(device),
            norm2: LayerNormConfig::new(self.d_model).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Pre-norm transformer encoder block:
/// x -> LayerNorm -> self-attention -> residual
///   -> LayerNorm -> MLP -> residual
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    attention: MultiHeadAttention<B>,
    mlp_in: Linear<B>,
    mlp_out: Linear<B>,
    norm1: LayerNorm<B>,
    norm2: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// x: [batch, tokens, d_model] -> [batch, tokens, d_model]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let normed = self.norm1.forward(x.clone());
        let attn = self.attention.forward(MhaInput::self_attn(normed)).context;
        let x = x + self.dropout.forward(attn);

        let normed = self.norm2.forward(x.clone());
        let mlp = self.mlp_out.forward(self.dropout.forward(gelu(self.mlp_in.forward(normed))));
        x + self.dropout.forward(mlp)
    }
}

/// Convolutional stem followed by a transformer encoder
#[derive(Module, Debug)]
pub struct HybridNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    blocks: Vec<BasicBlock<B>>,
    patch_embed: Conv2d<B>,
    position_embedding: Embedding<B>,
    dropout: Dropout,
    encoders: Vec<EncoderBlock<B>>,
    norm: LayerNorm<B>,
    head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> HybridNet<B> {
    /// Logits of shape [batch_size, num_classes] for images [batch_size, 3, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.stem_bn.forward(self.stem.forward(x)));
        for block in &self.blocks {
            x = block.forward(x);
        }

        // [B, D, h, w] -> [B, h*w, D]
        let x = self.patch_embed.forward(x);
        let [batch_size, d_model, height, width] = x.dims();
        let num_tokens = height * width;
        let tokens = x
            .reshape([batch_size, d_model, num_tokens])
            .swap_dims(1, 2);

        let positions = Tensor::<B, 1, Int>::arange(0..num_tokens as i64, &tokens.device())
            .unsqueeze::<2>()
            .expand([batch_size, num_tokens]);
        let mut x = self
            .dropout
            .forward(tokens + self.position_embedding.forward(positions));

        for encoder in &self.encoders {
            x = encoder.forward(x);
        }

        let pooled = self.norm.forward(x).mean_dim(1).reshape([batch_size, d_model]);
        self.head.forward(pooled)
    }

    pub fn depth(&self) -> usize {
        self.encoders.len()
    }
}

impl<B: Backend> ImageClassifier<B> for HybridNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        HybridNet::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> HybridNetConfig {
        HybridNetConfig::new()
            .with_embed_dim(32)
            .with_depth(1)
            .with_heads(4)
            .with_patch_size(2)
    }

    #[test]
    fn test_default_geometry() {
        let config = HybridNetConfig::new();
        assert_eq!(config.n_blocks, vec![2, 2, 1]);
        assert_eq!(config.stage_channels(), vec![64, 128, 256]);
        assert_eq!(config.feature_size(), 8);
        assert_eq!(config.num_patches(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let cases = [
            HybridNetConfig::new().with_depth(0),
            HybridNetConfig::new().with_heads(0),
            HybridNetConfig::new().with_heads(7),
            HybridNetConfig::new().with_patch_size(3),
            HybridNetConfig::new().with_n_blocks(vec![]),
            HybridNetConfig::new().with_n_blocks(vec![2, 0, 1]),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(TrainError::Config(_))),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        assert_eq!(model.depth(), 1);
        assert_eq!(model.blocks.len(), 5);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 10]);
    }
}
