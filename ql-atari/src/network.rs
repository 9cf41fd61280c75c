use anyhow::Result;
use burn::backend::{Autodiff, NdArray};
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::optim::{GradientsParams, Optimizer, RmsPropConfig};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor as BurnTensor, TensorData};

use ql::learn::parameter::{NetworkParameter, OptimizerParameter};
use ql::prelude::{QNetwork, QlError};
use ql::tensor::Tensor;

pub type TrainingBackend = Autodiff<NdArray>;
type InferenceBackend = NdArray;
type Device = <TrainingBackend as Backend>::Device;

const MAX_GRADIENT_NORM: f32 = 1.0;
const HIDDEN_UNITS: usize = 256;

struct ConvLayer {
    filters: usize,
    kernel: usize,
    stride: usize,
}

const CONV_1: ConvLayer = ConvLayer {
    filters: 16,
    kernel: 8,
    stride: 4,
};
const CONV_2: ConvLayer = ConvLayer {
    filters: 32,
    kernel: 4,
    stride: 2,
};

impl ConvLayer {
    /// Full padding: `kernel - 1` on each side
    fn init<B: Backend>(
        &self,
        channels: usize,
        device: &B::Device,
    ) -> Conv2d<B> {
        let padding = self.kernel - 1;
        Conv2dConfig::new([channels, self.filters], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device)
    }

    fn output_size(
        &self,
        size: usize,
    ) -> usize {
        (size + self.kernel - 2) / self.stride + 1
    }
}

/// conv 16@8x8/4 -> conv 32@4x4/2 -> fc 256 -> fc action_count
#[derive(Module, Debug)]
pub struct QModel<B: Backend> {
    conv_1: Conv2d<B>,
    conv_2: Conv2d<B>,
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> QModel<B> {
    pub fn new(
        network: &NetworkParameter,
        device: &B::Device,
    ) -> Self {
        let height = CONV_2.output_size(CONV_1.output_size(network.height));
        let width = CONV_2.output_size(CONV_1.output_size(network.width));
        Self {
            conv_1: CONV_1.init(network.channels, device),
            conv_2: CONV_2.init(CONV_1.filters, device),
            hidden: LinearConfig::new(CONV_2.filters * height * width, HIDDEN_UNITS).init(device),
            output: LinearConfig::new(HIDDEN_UNITS, network.action_count).init(device),
        }
    }

    /// `[n, channels, height, width]` -> `[n, action_count]`
    pub fn forward(
        &self,
        states: BurnTensor<B, 4>,
    ) -> BurnTensor<B, 2> {
        let x = relu(self.conv_1.forward(states));
        let x = relu(self.conv_2.forward(x));
        let x: BurnTensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.hidden.forward(x));
        self.output.forward(x)
    }
}

/// RMSProp with gradients clipped by their global norm
pub fn rms_prop(param: &OptimizerParameter) -> Result<impl Optimizer<QModel<TrainingBackend>, TrainingBackend>> {
    if param.name != "RMSProp" {
        return Err(QlError(format!("unsupported optimizer '{}'", param.name)).into());
    }
    Ok(RmsPropConfig::new()
        .with_alpha(param.decay)
        .with_momentum(param.momentum)
        .with_epsilon(param.epsilon)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(MAX_GRADIENT_NORM)))
        .init::<TrainingBackend, QModel<TrainingBackend>>())
}

/// Convolutional Q-value network, trained on the CPU.
pub struct ConvQNetwork<O> {
    model: QModel<TrainingBackend>,
    optimizer: O,
    learning_rate: f64,
    state_dims: [usize; 3],
    action_count: usize,
    device: Device,
}

/// Network with the layout of `network`, optimized as configured by `optimizer`
pub fn conv_q_network(
    network: &NetworkParameter,
    optimizer: &OptimizerParameter,
) -> Result<ConvQNetwork<impl Optimizer<QModel<TrainingBackend>, TrainingBackend>>> {
    ConvQNetwork::with_optimizer(network, rms_prop(optimizer)?, optimizer.learning_rate as f64)
}

impl<O> ConvQNetwork<O>
where
    O: Optimizer<QModel<TrainingBackend>, TrainingBackend>,
{
    pub fn with_optimizer(
        network: &NetworkParameter,
        optimizer: O,
        learning_rate: f64,
    ) -> Result<Self> {
        let state_dims = [network.channels, network.height, network.width];
        if state_dims.contains(&0) || network.action_count == 0 {
            return Err(QlError(format!(
                "can not build a network for states {:?} and {} actions",
                state_dims, network.action_count
            ))
            .into());
        }
        let device = Device::default();
        let model = QModel::new(network, &device);
        log::debug!("network with {} parameters for states {:?}", model.num_params(), state_dims);
        Ok(Self {
            model,
            optimizer,
            learning_rate,
            state_dims,
            action_count: network.action_count,
            device,
        })
    }

    pub fn num_params(&self) -> usize { self.model.num_params() }

    fn check_states(
        &self,
        states: &Tensor,
    ) -> Result<()> {
        if states.dims().len() != 4 || states.dims()[1..] != self.state_dims {
            return Err(QlError(format!(
                "network expects states [n, {:?}], got {:?}",
                self.state_dims,
                states.dims()
            ))
            .into());
        }
        Ok(())
    }
}

impl<O> QNetwork for ConvQNetwork<O>
where
    O: Optimizer<QModel<TrainingBackend>, TrainingBackend>,
{
    fn action_count(&self) -> usize { self.action_count }

    fn forward(
        &self,
        states: &Tensor,
    ) -> Result<Tensor> {
        self.check_states(states)?;
        let model: QModel<InferenceBackend> = self.model.valid();
        let q = model.forward(BurnTensor::from_data(states.to_data(), &self.device));
        Tensor::try_from(q.into_data())
    }

    fn gradient_step(
        &mut self,
        states: &Tensor,
        action_mask: &Tensor,
        targets: &[f32],
    ) -> Result<f32> {
        self.check_states(states)?;
        let n = targets.len();
        if states.len() != n || action_mask.dims() != [n, self.action_count] {
            return Err(QlError(format!(
                "inconsistent batch: {} states, mask {:?}, {} targets",
                states.len(),
                action_mask.dims(),
                n
            ))
            .into());
        }
        if n == 0 {
            return Ok(0.0);
        }

        let states = BurnTensor::<TrainingBackend, 4>::from_data(states.to_data(), &self.device);
        let mask = BurnTensor::<TrainingBackend, 2>::from_data(action_mask.to_data(), &self.device);
        let targets = BurnTensor::<TrainingBackend, 1>::from_data(TensorData::new(targets.to_vec(), [n]), &self.device);

        let predicted: BurnTensor<TrainingBackend, 1> = (self.model.forward(states) * mask).sum_dim(1).squeeze(1);
        let loss = (targets - predicted).powf_scalar(2.0).mean();
        let cost = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        Ok(cost)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.model.clone().into_record(), ())
            .map_err(|e| QlError(format!("failed to serialize network: {:?}", e)).into())
    }

    fn restore(
        &mut self,
        blob: &[u8],
    ) -> Result<()> {
        let record: QModelRecord<TrainingBackend> = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(blob.to_vec(), &self.device)
            .map_err(|e| QlError(format!("failed to deserialize network: {:?}", e)))?;
        let expected = self.model.num_params();
        let restored = self.model.clone().load_record(record);
        if restored.num_params() != expected {
            return Err(QlError(format!(
                "snapshot holds {} parameters, network needs {}",
                restored.num_params(),
                expected
            ))
            .into());
        }
        self.model = restored;
        Ok(())
    }
}
