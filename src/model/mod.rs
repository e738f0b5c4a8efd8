//! Network architectures built with the Burn framework
//!
//! This module provides:
//! - The [`ImageClassifier`] trait the training loop is written against
//! - A hybrid convolution + attention network
//! - CIFAR-style bottleneck ResNets (ResNet-50 / ResNet-152)
//! - [`Architecture`], the tagged union resolved into a [`Network`] at startup

pub mod classifier;
pub mod hybrid;
pub mod resnet;

// Re-export main types for convenience
pub use classifier::{Architecture, ImageClassifier, ModelKind, Network};
pub use hybrid::{HybridNet, HybridNetConfig};
pub use resnet::{ResNet, ResNetConfig, ResNetVariant};
