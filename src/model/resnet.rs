//! Bottleneck ResNets for 32x32 inputs
//!
//! CIFAR-style variant of the residual network: a 3x3 stem without the
//! ImageNet max-pool, four bottleneck stages with expansion 4, global average
//! pooling and a linear classifier.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::ImageClassifier;

const EXPANSION: usize = 4;
const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];
const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Depth variant of the residual network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResNetVariant {
    #[value(name = "resnet50")]
    ResNet50,
    #[value(name = "resnet152")]
    ResNet152,
}

impl ResNetVariant {
    /// Bottleneck blocks per stage
    pub fn stage_blocks(&self) -> [usize; 4] {
        match self {
            ResNetVariant::ResNet50 => [3, 4, 6, 3],
            ResNetVariant::ResNet152 => [3, 8, 36, 3],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResNetVariant::ResNet50 => "ResNet50",
            ResNetVariant::ResNet152 => "ResNet152",
        }
    }
}

impl std::fmt::Display for ResNetVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for [`ResNet`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNetConfig {
    pub variant: ResNetVariant,
    pub num_classes: usize,
}

impl ResNetConfig {
    pub fn new(variant: ResNetVariant, num_classes: usize) -> Self {
        Self {
            variant,
            num_classes,
        }
    }

    /// Build the network on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem = Conv2dConfig::new([3, STAGE_PLANES[0]], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(STAGE_PLANES[0]).init(device);

        let mut in_planes = STAGE_PLANES[0];
        let mut blocks: Vec<Bottleneck<B>> = Vec::new();
        for ((planes, stride), count) in STAGE_PLANES
            .iter()
            .zip(STAGE_STRIDES.iter())
            .zip(self.variant.stage_blocks().iter())
        {
            for i in 0..*count {
                let stride = if i == 0 { *stride } else { 1 };
                blocks.push(Bottleneck::new(in_planes, *planes, stride, device));
                in_planes = planes * EXPANSION;
            }
        }

        ResNet {
            stem,
            stem_bn,
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_planes, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

/// 1x1 projection used when a block changes resolution or width
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    pub(super) fn new(in_planes: usize, out_planes: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_planes, out_planes], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_planes).init(device),
        }
    }

    pub(super) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 1x1 -> 3x3 -> 1x1 residual block with expansion 4
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_planes: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_planes = planes * EXPANSION;

        let shortcut = (stride != 1 || in_planes != out_planes)
            .then(|| Projection::new(in_planes, out_planes, stride, device));

        Self {
            conv1: Conv2dConfig::new([in_planes, planes], [1, 1])
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: Conv2dConfig::new([planes, planes], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: Conv2dConfig::new([planes, out_planes], [1, 1])
                .with_bias(false)
                .init(device),
            bn3: BatchNormConfig::new(out_planes).init(device),
            shortcut,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = relu(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));

        relu(out + identity)
    }
}

/// Pure convolutional residual classifier
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    blocks: Vec<Bottleneck<B>>,
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ResNet<B> {
    /// Logits of shape [batch_size, num_classes] for images [batch_size, 3, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.stem_bn.forward(self.stem.forward(x)));
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        self.fc.forward(x.reshape([batch_size, channels]))
    }
}

impl<B: Backend> ImageClassifier<B> for ResNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        ResNet::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
