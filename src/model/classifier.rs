//! Classifier abstraction and architecture selection

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::hybrid::{HybridNet, HybridNetConfig};
use super::resnet::{ResNet, ResNetConfig, ResNetVariant};
use crate::utils::error::Result;

/// A module mapping image batches to class logits.
///
/// `forward` takes `[batch_size, 3, H, W]` and returns `[batch_size, num_classes]`.
pub trait ImageClassifier<B: Backend>: Module<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

/// Family of network to train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Convolutional stem with transformer encoder
    Hybrid,
    /// Pure convolutional residual network
    #[value(alias = "cnn")]
    #[serde(alias = "cnn")]
    Conv,
}

impl ModelKind {
    /// Storage label for checkpoints and logs
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Hybrid => "hybrid",
            ModelKind::Conv => "conv",
        }
    }
}

/// Fully specified network, resolved once at startup
#[derive(Debug, Clone)]
pub enum Architecture {
    Hybrid(HybridNetConfig),
    Conv(ResNetConfig),
}

impl Architecture {
    /// Hybrid network with the default convolutional stem
    pub fn hybrid(depth: usize, heads: usize, num_classes: usize) -> Self {
        Architecture::Hybrid(
            HybridNetConfig::new()
                .with_depth(depth)
                .with_heads(heads)
                .with_num_classes(num_classes),
        )
    }

    pub fn conv(variant: ResNetVariant, num_classes: usize) -> Self {
        Architecture::Conv(ResNetConfig::new(variant, num_classes))
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Architecture::Hybrid(_) => ModelKind::Hybrid,
            Architecture::Conv(_) => ModelKind::Conv,
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind().label()
    }

    /// Human readable summary for logs
    pub fn describe(&self) -> String {
        match self {
            Architecture::Hybrid(config) => format!(
                "Hybrid(n_blocks={:?}, patch_size={}, depth={}, heads={})",
                config.n_blocks, config.patch_size, config.depth, config.heads
            ),
            Architecture::Conv(config) => config.variant.to_string(),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Network<B>> {
        match self {
            Architecture::Hybrid(config) => Ok(Network::Hybrid(config.init(device)?)),
            Architecture::Conv(config) => Ok(Network::Conv(config.init(device))),
        }
    }
}

/// Any of the supported networks behind one module type
#[derive(Module, Debug)]
pub enum Network<B: Backend> {
    Hybrid(HybridNet<B>),
    Conv(ResNet<B>),
}

impl<B: Backend> ImageClassifier<B> for Network<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Network::Hybrid(model) => model.forward(images),
            Network::Conv(model) => model.forward(images),
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            Network::Hybrid(model) => ImageClassifier::num_classes(model),
            Network::Conv(model) => ImageClassifier::num_classes(model),
        }
    }
}
