use std::{
    fs::{create_dir_all, File},
    io::Write,
    path::PathBuf,
};

use vtkio::model::*;

use crate::{
    floating_type_mod::FT, simulation_parameters::SimulationParams, sph_kernels::DimensionUtils, vec2f,
    FluidSimulation, VF,
};

fn to_vec3d<const D: usize>(v: &VF<D>) -> [FT; 3] {
    if D == 2 {
        [v[0], v[1], 0.]
    } else {
        [v[0], v[1], v[2]]
    }
}

/// Walls and floor of the domain. The walls are drawn up to `2W` above the floor.
fn domain_lines<DU: DimensionUtils<D>, const D: usize>(simulation_params: &SimulationParams) -> Vec<(VF<D>, VF<D>)> {
    let w = simulation_params.world_half_width;
    let floor = simulation_params.floor;
    let top = floor + 2. * w;

    [
        (vec2f(-w, floor), vec2f(w, floor)),
        (vec2f(-w, floor), vec2f(-w, top)),
        (vec2f(w, floor), vec2f(w, top)),
    ]
    .iter()
    .map(|&(a, b)| (DU::from_vec2(a), DU::from_vec2(b)))
    .collect()
}

pub(crate) struct VtkExporter {
    /// something like './data/my-sph' which will get expanded to './data/my-sph-0001.vtk' and './data/my-sph.vtk.series'
    folder: PathBuf,
    basename: String,
    snapshot_number: usize,
    series_file: File,
}

impl VtkExporter {
    pub(crate) fn new(folder: impl Into<PathBuf>, basename: impl Into<String>) -> Result<VtkExporter, String> {
        let folder: PathBuf = folder.into();
        let basename: String = basename.into();

        create_dir_all(&folder).map_err(|e| format!("failed to create directory {}: {}", folder.display(), e))?;

        let series_path = folder.join(format!("{}.vtk.series", basename));
        let mut series_file =
            File::create(&series_path).map_err(|e| format!("failed to create {}: {}", series_path.display(), e))?;
        let series_prelude_str = "{\n\"file-series-version\": \"1.0\",\n\"files\": [";
        series_file
            .write_all(series_prelude_str.as_bytes())
            .map_err(|e| e.to_string())?;

        Ok(VtkExporter {
            series_file,
            folder,
            basename,
            snapshot_number: 1,
        })
    }

    pub(crate) fn add_snapshot<DU: DimensionUtils<D>, const D: usize>(
        &mut self,
        fluid_simulation: &FluidSimulation<DU, D>,
    ) -> Result<(), String> {
        if self.snapshot_number > 1 {
            self.series_file.write_all(",".as_bytes()).map_err(|e| e.to_string())?;
        }

        let vtk_filename = format!("{}-{:05}.vtk", self.basename, self.snapshot_number);
        Self::write_vtk_file(self.folder.join(&vtk_filename), fluid_simulation)?;

        write!(
            self.series_file,
            "\n{{ \"name\": \"{}\", \"time\": {} }}",
            vtk_filename,
            fluid_simulation.step_number()
        )
        .map_err(|e| e.to_string())?;

        self.snapshot_number += 1;
        Ok(())
    }

    fn write_vtk_file<P: Into<PathBuf>, DU: DimensionUtils<D>, const D: usize>(
        path: P,
        fluid_simulation: &FluidSimulation<DU, D>,
    ) -> Result<(), String> {
        let particles = fluid_simulation.particles();

        let mut data_ft: Vec<(String, Vec<FT>)> = Vec::new();
        let mut data_vec: Vec<(String, Vec<VF<D>>)> = Vec::new();
        let mut data_color: Vec<(String, Vec<VF<3>>)> = Vec::new();
        let mut data_u32: Vec<(String, Vec<u32>)> = Vec::new();

        data_ft.push(("density".into(), particles.meta.density.clone()));
        data_ft.push(("density_near".into(), particles.meta.density_near.clone()));
        data_ft.push(("pressure".into(), particles.meta.pressure.clone()));
        data_ft.push(("pressure_near".into(), particles.meta.pressure_near.clone()));

        data_vec.push(("velocity".into(), particles.meta.velocity.clone()));
        data_color.push(("color".into(), particles.meta.color.clone()));

        data_u32.push((
            "neighbor_count".into(),
            particles.meta.neighbors.iter().map(|n| n.len() as u32).collect(),
        ));

        let lines = domain_lines::<DU, D>(fluid_simulation.params());

        write_vtk_file2(
            path,
            particles.hot.position.clone(),
            data_ft,
            data_vec,
            data_color,
            data_u32,
            lines,
        )
    }
}

impl Drop for VtkExporter {
    fn drop(&mut self) {
        let series_end_str = "\n]\n}";
        if let Err(e) = self.series_file.write_all(series_end_str.as_bytes()) {
            log::error!("failed to finish vtk series file: {}", e);
        }
    }
}

fn vector_data_arrays<const D: usize>(data_vec: Vec<(String, Vec<VF<D>>)>, num_dummies: usize) -> Vec<DataArray> {
    data_vec
        .into_iter()
        .map(|(name, mut arr)| {
            let mut data_array = DataArray::scalars(name, 3);
            for _ in 0..num_dummies {
                // add dummy data for line cells
                arr.push(VF::<D>::zeros());
            }
            data_array.data = arr.iter().flat_map(to_vec3d).collect::<Vec<_>>().into();
            data_array
        })
        .collect()
}

pub fn write_vtk_file2<P: Into<PathBuf>, const D: usize>(
    path: P,
    mut positions: Vec<VF<D>>,
    data_ft: Vec<(String, Vec<FT>)>,
    data_vec: Vec<(String, Vec<VF<D>>)>,
    data_color: Vec<(String, Vec<VF<3>>)>,
    data_u32: Vec<(String, Vec<u32>)>,
    lines: Vec<(VF<D>, VF<D>)>,
) -> Result<(), String> {
    let mut data_arrays: Vec<DataArray> = Vec::new();
    let num_lines = lines.len();

    for (name, mut arr) in data_ft {
        let mut data_array = DataArray::scalars(name, 1);

        for _ in 0..2 * num_lines {
            // add dummy data for line cells
            arr.push(0.);
        }

        data_array.data = arr.into();
        data_arrays.push(data_array);
    }

    data_arrays.append(&mut vector_data_arrays(data_vec, 2 * num_lines));
    data_arrays.append(&mut vector_data_arrays(data_color, 2 * num_lines));

    for (name, mut arr) in data_u32 {
        let mut data_array = DataArray::scalars(name, 1);

        for _ in 0..2 * num_lines {
            arr.push(0);
        }

        data_array.data = arr.into();
        data_arrays.push(data_array);
    }

    let path = path.into();

    let num_particles = positions.len();
    let vtk_verts: Vec<u32> = (0..num_particles).flat_map(|i| [1, i as u32]).collect();

    let mut vtk_line_indices: Vec<u32> = Vec::new();
    for (a, b) in lines {
        let a_idx = positions.len();
        positions.push(a);

        let b_idx = positions.len();
        positions.push(b);

        vtk_line_indices.push(2);
        vtk_line_indices.push(a_idx as u32);
        vtk_line_indices.push(b_idx as u32);
    }

    let vtk_points: Vec<FT> = positions.iter().flat_map(|x: &VF<D>| to_vec3d(x)).collect();

    let vtk = Vtk {
        version: Version::new((4, 2)),
        byte_order: ByteOrder::BigEndian,
        title: String::from("Double density SPH particles"),
        file_path: Some(path.clone()),
        data: DataSet::PolyData {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(PolyDataPiece {
                points: vtk_points.into(),
                verts: VertexNumbers::Legacy {
                    num_cells: num_particles as u32,
                    vertices: vtk_verts,
                }
                .into(),
                lines: VertexNumbers::Legacy {
                    num_cells: num_lines as u32,
                    vertices: vtk_line_indices,
                }
                .into(),
                data: Attributes {
                    cell: Vec::new(),
                    point: data_arrays.into_iter().map(Attribute::DataArray).collect(),
                },
                ..Default::default()
            }))],
        },
    };
    vtk.export(&path)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))
}

#[test]
fn exports_snapshots_and_series() {
    use crate::FluidSimulation2d;

    let folder = std::env::temp_dir().join(format!("double-density-sph-vtk-{}", std::process::id()));
    let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 30).unwrap();

    {
        let mut exporter = VtkExporter::new(&folder, "fluid").unwrap();
        for _ in 0..2 {
            fluid.step();
            exporter.add_snapshot(&fluid).unwrap();
        }
    }

    assert!(folder.join("fluid-00001.vtk").exists());
    assert!(folder.join("fluid-00002.vtk").exists());

    let series = std::fs::read_to_string(folder.join("fluid.vtk.series")).unwrap();
    assert!(series.contains("\"name\": \"fluid-00001.vtk\", \"time\": 1"));
    assert!(series.contains("\"name\": \"fluid-00002.vtk\", \"time\": 2"));
    assert!(series.trim_end().ends_with('}'));

    // binary legacy format, the attribute names are plain text
    let vtk = std::fs::read(folder.join("fluid-00002.vtk")).unwrap();
    for name in [&b"density_near"[..], &b"neighbor_count"[..]] {
        assert!(vtk.windows(name.len()).any(|w| w == name));
    }

    std::fs::remove_dir_all(&folder).unwrap();
}

#[test]
fn domain_lines_cover_walls_and_floor() {
    use crate::sph_kernels::DimensionUtils2d;

    let params = SimulationParams::default();
    let lines = domain_lines::<DimensionUtils2d, 2>(&params);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], (vec2f(-50., 0.), vec2f(50., 0.)));
    assert_eq!(lines[2].1, vec2f(50., 100.));
}
