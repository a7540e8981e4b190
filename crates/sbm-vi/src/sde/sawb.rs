use candle_core::Tensor;

use super::{
    arrhenius, param_block, param_column, DiffusionType, ForcingTensors, ForcingWindow, SdeModel,
};

const POOLS: [&str; 4] = ["SOC", "DOC", "MBC", "EEC"];

const DRIFT_PARAMS: [&str; 12] = [
    "u_Q_ref", "Q", "a_MSA", "K_D", "K_U", "V_D_ref", "V_U_ref", "Ea_V_D", "Ea_V_U", "r_M", "r_E",
    "r_L",
];

const U_Q_REF: usize = 0;
const Q: usize = 1;
const A_MSA: usize = 2;
const K_D: usize = 3;
const K_U: usize = 4;
const V_D_REF: usize = 5;
const V_U_REF: usize = 6;
const EA_V_D: usize = 7;
const EA_V_U: usize = 8;
const R_M: usize = 9;
const R_E: usize = 10;
const R_L: usize = 11;

/// Enzyme-mediated model with Michaelis–Menten decomposition and uptake.
///
/// Extracellular enzymes (EEC) catalyze SOC decomposition; microbes take up
/// DOC with a temperature-dependent carbon-use efficiency
/// `CUE = u_Q_ref - Q (T - T_ref)`.
#[derive(Debug, Clone)]
pub struct Sawb {
    diffusion: DiffusionType,
    forcing: ForcingTensors,
    temp_ref: f64,
    param_names: Vec<String>,
}

struct Fluxes {
    window: ForcingWindow,
    cue: Tensor,
    decomposition: Tensor,
    uptake: Tensor,
}

impl Sawb {
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

        let soc = x.narrow(2, 0, 1)?;
        let doc = x.narrow(2, 1, 1)?;
        let mbc = x.narrow(2, 2, 1)?;
        let eec = x.narrow(2, 3, 1)?;

        let v_d = arrhenius(&p(V_D_REF)?, &p(EA_V_D)?, &window.temperature, self.temp_ref)?;
        let v_u = arrhenius(&p(V_U_REF)?, &p(EA_V_U)?, &window.temperature, self.temp_ref)?;
        let warming = window.temperature.affine(1.0, -self.temp_ref)?;
        let cue = p(U_Q_REF)?.broadcast_sub(&p(Q)?.broadcast_mul(&warming)?)?;

        let decomposition = v_d
            .broadcast_mul(&eec)?
            .broadcast_mul(&soc)?
            .broadcast_div(&p(K_D)?.broadcast_add(&soc)?)?;
        let uptake = v_u
            .broadcast_mul(&mbc)?
            .broadcast_mul(&doc)?
            .broadcast_div(&p(K_U)?.broadcast_add(&doc)?)?;
        Ok(Fluxes {
            window,
            cue,
            decomposition,
            uptake,
        })
    }
}

impl SdeModel for Sawb {
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
        let p = |i: usize| param_column(theta, i);
        let mbc = x.narrow(2, 2, 1)?;
        let eec = x.narrow(2, 3, 1)?;

        let death = p(R_M)?.broadcast_mul(&mbc)?;
        let death_to_soc = death.broadcast_mul(&p(A_MSA)?)?;
        let death_to_doc = (&death - &death_to_soc)?;
        let enzyme_production = p(R_E)?.broadcast_mul(&mbc)?;
        let enzyme_loss = p(R_L)?.broadcast_mul(&eec)?;

        let d_soc = f
            .window
            .litter_soc
            .broadcast_add(&death_to_soc)?
            .broadcast_sub(&f.decomposition)?;
        let d_doc = f
            .window
            .litter_doc
            .broadcast_add(&death_to_doc)?
            .broadcast_add(&f.decomposition)?
            .broadcast_add(&enzyme_loss)?
            .broadcast_sub(&f.uptake)?;
        let d_mbc = ((f.cue.broadcast_mul(&f.uptake)? - &death)? - &enzyme_production)?;
        let d_eec = (&enzyme_production - &enzyme_loss)?;
        let drift = Tensor::cat(&[d_soc, d_doc, d_mbc, d_eec], 2)?;

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
        f.cue.affine(-1.0, 1.0)?.broadcast_mul(&f.uptake)
    }
}
