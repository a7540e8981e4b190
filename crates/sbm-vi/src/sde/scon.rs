use candle_core::Tensor;

use super::{
    arrhenius, param_block, param_column, DiffusionType, ForcingTensors, ForcingWindow, SdeModel,
};

const POOLS: [&str; 3] = ["SOC", "DOC", "MBC"];

const DRIFT_PARAMS: [&str; 11] = [
    "u_M", "a_SD", "a_DS", "a_M", "a_MSC", "k_S_ref", "k_D_ref", "k_M_ref", "Ea_S", "Ea_D",
    "Ea_M",
];

const U_M: usize = 0;
const A_SD: usize = 1;
const A_DS: usize = 2;
const A_M: usize = 3;
const A_MSC: usize = 4;
const K_S_REF: usize = 5;
const K_D_REF: usize = 6;
const K_M_REF: usize = 7;
const EA_S: usize = 8;
const EA_D: usize = 9;
const EA_M: usize = 10;

/// Sequential conversion model: litter feeds SOC and DOC, microbes take up
/// DOC, and dead microbial mass returns to SOC and DOC.
///
/// Decay rates follow Arrhenius kinetics in temperature.
#[derive(Debug, Clone)]
pub struct Scon {
    diffusion: DiffusionType,
    forcing: ForcingTensors,
    temp_ref: f64,
    param_names: Vec<String>,
}

/// Intermediate fluxes shared by the drift and the CO2 flux.
struct Fluxes {
    window: ForcingWindow,
    soc_decay: Tensor,
    doc_decay: Tensor,
    mbc_decay: Tensor,
    uptake: Tensor,
}

impl Scon {
    pub fn new(diffusion: DiffusionType, forcing: ForcingTensors, temp_ref: f64) -> Self {
        let mut param_names: Vec<String> = DRIFT_PARAMS.iter().map(|s| s.to_string()).collect();
        param_names.extend(diffusion.param_names(&POOLS));
        Self {
            diffusion,
            forcing,
            temp_ref,
            param_names,
        }
    }

    fn fluxes(&self, x: &Tensor, theta: &Tensor, offset: usize) -> candle_core::Result<Fluxes> {
        let window = self.forcing.window(offset, x.dim(1)?)?;
        let p = |i: usize| param_column(theta, i);
        let rate = |k_ref: usize, ea: usize| {
            arrhenius(&p(k_ref)?, &p(ea)?, &window.temperature, self.temp_ref)
        };

        let soc = x.narrow(2, 0, 1)?;
        let doc = x.narrow(2, 1, 1)?;
        let mbc = x.narrow(2, 2, 1)?;
        Ok(Fluxes {
            soc_decay: rate(K_S_REF, EA_S)?.broadcast_mul(&soc)?,
            doc_decay: rate(K_D_REF, EA_D)?.broadcast_mul(&doc)?,
            mbc_decay: rate(K_M_REF, EA_M)?.broadcast_mul(&mbc)?,
            uptake: p(U_M)?.broadcast_mul(&doc)?,
            window,
        })
    }
}

impl SdeModel for Scon {
    fn state_names(&self) -> &[&'static str] {
        &POOLS
    }

    fn param_names(&self) -> &[String] {
        &self.param_names
    }

    fn drift_diffusion(
        &self,
        x: &Tensor,
        theta: &Tensor,
        time_offset: usize,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let f = self.fluxes(x, theta, time_offset)?;
        let a_sd = param_column(theta, A_SD)?;
        let a_ds = param_column(theta, A_DS)?;
        let a_m = param_column(theta, A_M)?;
        let a_msc = param_column(theta, A_MSC)?;

        let necromass = f.mbc_decay.broadcast_mul(&a_m)?;
        let to_soc = necromass.broadcast_mul(&a_msc)?;
        let to_doc = (&necromass - &to_soc)?;

        let d_soc = f
            .window
            .litter_soc
            .broadcast_add(&f.doc_decay.broadcast_mul(&a_ds)?)?
            .broadcast_add(&to_soc)?
            .broadcast_sub(&f.soc_decay)?;
        let d_doc = f
            .window
            .litter_doc
            .broadcast_add(&f.soc_decay.broadcast_mul(&a_sd)?)?
            .broadcast_add(&to_doc)?
            .broadcast_sub(&f.uptake)?
            .broadcast_sub(&f.doc_decay)?;
        let d_mbc = (&f.uptake - &f.mbc_decay)?;
        let drift = Tensor::cat(&[d_soc, d_doc, d_mbc], 2)?;

        let coeffs = param_block(theta, DRIFT_PARAMS.len(), POOLS.len())?;
        let diffusion = self.diffusion.diffusion_sqrt(x, &coeffs)?;
        Ok((drift, diffusion))
    }

    fn derived_flux(
        &self,
        x: &Tensor,
        theta: &Tensor,
        time_offset: usize,
    ) -> candle_core::Result<Tensor> {
        let f = self.fluxes(x, theta, time_offset)?;
        let respired = |i: usize| param_column(theta, i)?.affine(-1.0, 1.0);
        let soc = f.soc_decay.broadcast_mul(&respired(A_SD)?)?;
        let doc = f.doc_decay.broadcast_mul(&respired(A_DS)?)?;
        let mbc = f.mbc_decay.broadcast_mul(&respired(A_M)?)?;
        (soc + doc)? + mbc
    }
}
